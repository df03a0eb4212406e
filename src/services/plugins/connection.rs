//! Plugin Connection
//!
//! Wraps the write half of one plugin socket and correlates host requests
//! with plugin responses. Every outgoing message gets a fresh,
//! per-connection, monotonically increasing `id`; requests that expect an
//! answer park a oneshot sender under that id until the matching
//! `plugin-response` arrives.
//!
//! Delivery is at-most-once: a response for an unknown or already answered id
//! is dropped. There is no retry at this layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use dashmap::DashMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use inkpad_core::{Envelope, PluginInfo, PluginMessage, PluginResponse};

use crate::utils::error::{AppError, AppResult};

/// Boxed socket write half.
pub type PluginWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One live socket to a plugin process.
pub struct PluginConnection {
    /// Remote address, for logs
    peer: String,
    /// Set once the plugin has sent `register-plugin`
    info: RwLock<Option<PluginInfo>>,
    writer: Mutex<PluginWriter>,
    next_id: AtomicU64,
    /// Requests waiting for a response, keyed by request ID
    pending: DashMap<u64, oneshot::Sender<PluginResponse>>,
}

impl PluginConnection {
    pub fn new<W>(peer: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            peer: peer.into(),
            info: RwLock::new(None),
            writer: Mutex::new(Box::new(writer)),
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Attach the plugin identity announced in the handshake.
    pub fn bind(&self, info: PluginInfo) {
        if let Ok(mut slot) = self.info.write() {
            *slot = Some(info);
        }
    }

    pub fn info(&self) -> Option<PluginInfo> {
        self.info.read().ok().and_then(|info| info.clone())
    }

    /// Normalized name of the bound plugin, if the handshake happened.
    pub fn plugin_key(&self) -> Option<String> {
        self.info().map(|info| info.key())
    }

    /// Send a message without waiting for an answer. Returns the assigned id.
    pub async fn send_message(&self, message: PluginMessage) -> AppResult<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write_envelope(&Envelope::with_id(id, message)).await?;
        Ok(id)
    }

    /// Send a message and register for its response.
    ///
    /// The returned receiver resolves with the correlated `plugin-response`,
    /// or errors if the connection goes away first.
    pub async fn request(
        &self,
        message: PluginMessage,
    ) -> AppResult<(u64, oneshot::Receiver<PluginResponse>)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if let Err(e) = self.write_envelope(&Envelope::with_id(id, message)).await {
            self.pending.remove(&id);
            return Err(e);
        }
        Ok((id, rx))
    }

    /// Answer a plugin-originated message that carried `id`.
    pub async fn reply(&self, id: u64, response: PluginResponse) -> AppResult<()> {
        self.write_envelope(&Envelope::with_id(id, PluginMessage::PluginResponse(response)))
            .await
    }

    /// Route a response to its waiting caller.
    ///
    /// Returns false when nobody is waiting for `id` (unknown, already
    /// answered, or timed out); the response is dropped.
    pub fn handle_response(&self, id: u64, response: PluginResponse) -> bool {
        match self.pending.remove(&id) {
            Some((_, sender)) => sender.send(response).is_ok(),
            None => {
                debug!(peer = %self.peer, id, "Dropping response with no pending request");
                false
            }
        }
    }

    /// Forget a pending request, e.g. after its caller timed out.
    pub fn cancel(&self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending request; waiting callers observe a closed channel.
    pub fn fail_pending(&self) {
        self.pending.clear();
    }

    async fn write_envelope(&self, envelope: &Envelope) -> AppResult<()> {
        let bytes = envelope.to_bytes()?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| AppError::transport(format!("write to {} failed: {}", self.peer, e)))?;
        writer
            .flush()
            .await
            .map_err(|e| AppError::transport(format!("flush to {} failed: {}", self.peer, e)))?;

        debug!(peer = %self.peer, kind = envelope.message.kind(), id = ?envelope.id, "plugin <-");
        Ok(())
    }
}

impl std::fmt::Debug for PluginConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginConnection")
            .field("peer", &self.peer)
            .field("plugin", &self.plugin_key())
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkpad_core::{ExecutePayload, MessageBuffer};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn execute(content: &str) -> PluginMessage {
        PluginMessage::ExecutePlugin(ExecutePayload {
            content: content.to_string(),
            file_path: None,
            options: None,
        })
    }

    async fn read_envelopes(reader: &mut DuplexStream, count: usize) -> Vec<Envelope> {
        let mut buffer = MessageBuffer::new();
        let mut out = Vec::new();
        let mut chunk = [0u8; 1024];
        while out.len() < count {
            let n = reader.read(&mut chunk).await.unwrap();
            assert!(n > 0, "stream closed early");
            buffer.push(&chunk[..n]);
            out.extend(buffer.drain_envelopes().into_iter().map(|e| e.unwrap()));
        }
        out
    }

    #[tokio::test]
    async fn test_ids_increase_per_connection() {
        let (writer, mut reader) = tokio::io::duplex(4096);
        let conn = PluginConnection::new("test", writer);

        assert_eq!(conn.send_message(execute("a")).await.unwrap(), 1);
        assert_eq!(conn.send_message(execute("b")).await.unwrap(), 2);

        let sent = read_envelopes(&mut reader, 2).await;
        assert_eq!(sent[0].id, Some(1));
        assert_eq!(sent[1].id, Some(2));
        assert_eq!(sent[1].message, execute("b"));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses_are_not_cross_wired() {
        let (writer, _reader) = tokio::io::duplex(4096);
        let conn = PluginConnection::new("test", writer);

        let (first_id, first_rx) = conn.request(execute("first")).await.unwrap();
        let (second_id, second_rx) = conn.request(execute("second")).await.unwrap();
        assert_eq!(conn.pending_count(), 2);

        assert!(conn.handle_response(second_id, PluginResponse::ok("second", Some(json!(2)))));
        assert!(conn.handle_response(first_id, PluginResponse::ok("first", Some(json!(1)))));

        assert_eq!(first_rx.await.unwrap().data, Some(json!(1)));
        assert_eq!(second_rx.await.unwrap().data, Some(json!(2)));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_response_delivered_at_most_once() {
        let (writer, _reader) = tokio::io::duplex(4096);
        let conn = PluginConnection::new("test", writer);

        let (id, rx) = conn.request(execute("x")).await.unwrap();
        assert!(conn.handle_response(id, PluginResponse::ok("one", None)));
        assert!(!conn.handle_response(id, PluginResponse::ok("two", None)));
        assert_eq!(rx.await.unwrap().message, "one");
    }

    #[tokio::test]
    async fn test_unknown_id_is_dropped() {
        let (writer, _reader) = tokio::io::duplex(4096);
        let conn = PluginConnection::new("test", writer);
        assert!(!conn.handle_response(99, PluginResponse::ok("stray", None)));
    }

    #[tokio::test]
    async fn test_cancel_then_late_response() {
        let (writer, _reader) = tokio::io::duplex(4096);
        let conn = PluginConnection::new("test", writer);

        let (id, rx) = conn.request(execute("slow")).await.unwrap();
        assert!(conn.cancel(id));
        assert!(!conn.handle_response(id, PluginResponse::ok("late", None)));
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_fail_pending_closes_waiters() {
        let (writer, _reader) = tokio::io::duplex(4096);
        let conn = PluginConnection::new("test", writer);

        let (_, rx) = conn.request(execute("x")).await.unwrap();
        conn.fail_pending();
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_write_failure_is_transport_error() {
        let (writer, reader) = tokio::io::duplex(64);
        drop(reader);
        let conn = PluginConnection::new("test", writer);

        let err = conn.request(execute("x")).await.unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reply_echoes_id() {
        let (writer, mut reader) = tokio::io::duplex(4096);
        let conn = PluginConnection::new("test", writer);

        conn.reply(17, PluginResponse::err("no such menu item")).await.unwrap();

        let sent = read_envelopes(&mut reader, 1).await;
        assert_eq!(sent[0].id, Some(17));
        assert_eq!(
            sent[0].message,
            PluginMessage::PluginResponse(PluginResponse::err("no such menu item"))
        );
    }

    #[test]
    fn test_bind_sets_key() {
        let (writer, _reader) = tokio::io::duplex(64);
        let conn = PluginConnection::new("test", writer);
        assert!(conn.plugin_key().is_none());

        conn.bind(PluginInfo::named("autosave-1.0.0"));
        assert_eq!(conn.plugin_key().as_deref(), Some("autosave"));
    }
}

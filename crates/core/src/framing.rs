//! Stream Framing
//!
//! Plugins write one JSON document per socket write, without a delimiter. TCP
//! does not preserve write boundaries, so a single read may hold half a
//! document, or several documents back to back. `MessageBuffer` accumulates
//! bytes and yields every complete document, keeping an incomplete tail until
//! more data arrives.

use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::protocol::Envelope;

/// Accumulates raw socket bytes and splits them into JSON documents.
///
/// Document boundaries are found with a small brace/string scanner whose
/// state survives between reads, so every byte is examined once no matter
/// how many fragments a large document arrives in. Each complete document is
/// then parsed exactly once.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    buf: Vec<u8>,
    /// Bytes of `buf` already examined by the scanner
    scanned: usize,
    /// Open `{`/`[` in the current document; 0 between documents
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the socket.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes still waiting for the rest of their document.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Remove and return every complete JSON document in the buffer.
    ///
    /// Bytes outside a document that are neither whitespace nor an opening
    /// brace are reported as a `CoreError::Parse` and skipped up to the next
    /// `{`, so one bad write does not wedge the stream. A document with
    /// balanced braces that still fails to parse is reported the same way.
    pub fn drain_values(&mut self) -> Vec<CoreResult<Value>> {
        let mut out = Vec::new();
        // Start of the current document, or of the unscanned remainder
        let mut consumed = 0;
        let mut i = self.scanned;

        while i < self.buf.len() {
            let byte = self.buf[i];

            if self.depth == 0 {
                match byte {
                    b'{' | b'[' => self.depth = 1,
                    b if b.is_ascii_whitespace() => consumed = i + 1,
                    other => {
                        out.push(Err(CoreError::parse(format!(
                            "unexpected byte 0x{:02x} outside a message",
                            other
                        ))));
                        match self.buf[i + 1..].iter().position(|b| *b == b'{') {
                            Some(pos) => {
                                consumed = i + 1 + pos;
                                i = consumed;
                            }
                            None => {
                                consumed = self.buf.len();
                                i = consumed;
                            }
                        }
                        continue;
                    }
                }
            } else if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
            } else {
                match byte {
                    b'"' => self.in_string = true,
                    b'{' | b'[' => self.depth += 1,
                    b'}' | b']' => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            let document = &self.buf[consumed..=i];
                            out.push(
                                serde_json::from_slice(document)
                                    .map_err(|e| CoreError::parse(e.to_string())),
                            );
                            consumed = i + 1;
                        }
                    }
                    _ => {}
                }
            }
            i += 1;
        }

        self.buf.drain(..consumed);
        self.scanned = i - consumed;
        out
    }

    /// Like [`drain_values`](Self::drain_values) but decodes protocol envelopes.
    pub fn drain_envelopes(&mut self) -> Vec<CoreResult<Envelope>> {
        self.drain_values()
            .into_iter()
            .map(|value| value.and_then(Envelope::from_value))
            .collect()
    }
}

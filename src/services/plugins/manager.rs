//! Plugin Manager
//!
//! Unified entry point for the plugin host. Owns the loopback socket server
//! plugins connect to, the table of live plugins, their child processes and
//! the menu registry, and exposes the operations the UI calls.
//!
//! Plugin lifecycle:
//! `uninstalled -> installed -> running (registered | assumed) -> stopped`
//!
//! A plugin is *registered* once its process connected back and sent
//! `register-plugin`. When the handshake does not arrive within the grace
//! period the plugin is recorded as *assumed running*, and upgraded when the
//! real handshake shows up later.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use inkpad_core::{
    normalize_plugin_name, Envelope, ExecutePayload, MenuActionPayload, MenuItem, MessageBuffer,
    PluginInfo, PluginMessage, PluginResponse, RegisterMenuPayload,
};

use crate::models::settings::AppConfig;
use crate::services::plugins::connection::PluginConnection;
use crate::services::plugins::installer::PluginInstaller;
use crate::services::plugins::menu::MenuRegistry;
use crate::services::plugins::models::{AvailablePlugin, PluginRunState, UninstallReport};
use crate::services::plugins::process::{resolve_entry_point, ProcessTable};
use crate::services::plugins::subscribers::{ListenerId, Subscribers};
use crate::utils::error::{AppError, AppResult};

/// Socket read buffer size.
const READ_CHUNK: usize = 8192;

/// One live plugin, keyed by normalized name in the plugin table.
#[derive(Debug, Clone)]
struct PluginEntry {
    info: PluginInfo,
    state: PluginRunState,
    /// None while the plugin is only assumed to be running
    connection: Option<Arc<PluginConnection>>,
}

struct Inner {
    config: AppConfig,
    installer: Arc<PluginInstaller>,
    menus: Arc<MenuRegistry>,
    plugins: RwLock<HashMap<String, PluginEntry>>,
    processes: ProcessTable,
    plugin_listeners: Subscribers<[PluginInfo]>,
    /// Normalized names of plugins as they complete the handshake
    registrations: broadcast::Sender<String>,
    shutdown: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    /// Keys of plugin processes that exited on their own; taken by `start`
    process_exits: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    /// Bound port; 0 until `start` ran
    local_port: AtomicU16,
}

/// Plugin host. Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct PluginManager {
    inner: Arc<Inner>,
}

impl PluginManager {
    pub fn new(config: AppConfig, installer: Arc<PluginInstaller>, menus: Arc<MenuRegistry>) -> Self {
        let (registrations, _) = broadcast::channel(64);
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                config,
                installer,
                menus,
                plugins: RwLock::new(HashMap::new()),
                processes: ProcessTable::with_exit_notifier(exits_tx),
                plugin_listeners: Subscribers::new(),
                registrations,
                shutdown: CancellationToken::new(),
                accept_task: Mutex::new(None),
                process_exits: Mutex::new(Some(exits_rx)),
                local_port: AtomicU16::new(0),
            }),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn installer(&self) -> &Arc<PluginInstaller> {
        &self.inner.installer
    }

    pub fn menus(&self) -> &Arc<MenuRegistry> {
        &self.inner.menus
    }

    /// Port plugins connect to, once the host is started.
    pub fn local_port(&self) -> Option<u16> {
        match self.inner.local_port.load(Ordering::SeqCst) {
            0 => None,
            port => Some(port),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Bind the loopback listener, start accepting plugin connections and
    /// launch every installed plugin. Returns the bound port.
    pub async fn start(&self) -> AppResult<u16> {
        if self.local_port().is_some() {
            return Err(AppError::internal("plugin host already started"));
        }

        let listener = TcpListener::bind(("127.0.0.1", self.inner.config.plugin_port))
            .await
            .map_err(|e| {
                AppError::transport(format!(
                    "Failed to bind 127.0.0.1:{}: {}",
                    self.inner.config.plugin_port, e
                ))
            })?;
        let port = listener.local_addr()?.port();
        self.inner.local_port.store(port, Ordering::SeqCst);

        let manager = self.clone();
        let handle = tokio::spawn(async move { manager.accept_loop(listener).await });
        if let Ok(mut slot) = self.inner.accept_task.lock() {
            *slot = Some(handle);
        }
        let exits = self.inner.process_exits.lock().ok().and_then(|mut slot| slot.take());
        if let Some(exits) = exits {
            let manager = self.clone();
            tokio::spawn(async move { manager.watch_process_exits(exits).await });
        }
        info!(port, "Plugin host listening");

        let installed = self.inner.installer.list_installed();
        let starts = installed.into_iter().map(|plugin| {
            let manager = self.clone();
            async move {
                if let Err(e) = manager.start_plugin(&plugin.manifest.name).await {
                    warn!(plugin = %plugin.manifest.name, "Failed to start plugin: {}", e);
                }
            }
        });
        futures_util::future::join_all(starts).await;

        Ok(port)
    }

    /// Stop accepting connections, drop every socket, clear the plugin table
    /// and kill every plugin process.
    pub async fn shutdown(&self) {
        info!("Shutting down plugin host");
        self.inner.shutdown.cancel();

        let accept_task = self.inner.accept_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = accept_task {
            let _ = handle.await;
        }

        let drained: Vec<(String, PluginEntry)> = match self.inner.plugins.write() {
            Ok(mut plugins) => plugins.drain().collect(),
            Err(_) => Vec::new(),
        };
        for (key, entry) in &drained {
            if let Some(connection) = &entry.connection {
                connection.fail_pending();
            }
            self.inner.menus.unregister_menu_items_by_plugin(key);
        }

        self.inner.processes.stop_all().await;

        if !drained.is_empty() {
            self.notify_plugins();
        }
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, "Failed to set TCP_NODELAY: {}", e);
                        }
                        let manager = self.clone();
                        tokio::spawn(async move {
                            manager.serve_connection(stream, peer.to_string()).await;
                        });
                    }
                    Err(e) => warn!("Failed to accept plugin connection: {}", e),
                },
            }
        }
        debug!("Plugin accept loop stopped");
    }

    async fn watch_process_exits(self, mut exits: mpsc::UnboundedReceiver<String>) {
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                exited = exits.recv() => match exited {
                    Some(key) => self.handle_process_exit(&key),
                    None => break,
                },
            }
        }
    }

    /// Drop an assumed-running entry whose process is gone. Registered
    /// plugins are cleaned up by their socket closing instead.
    fn handle_process_exit(&self, key: &str) {
        if self.inner.processes.is_running(key) {
            return;
        }
        let removed = match self.inner.plugins.write() {
            Ok(mut plugins) => {
                let assumed = plugins
                    .get(key)
                    .map(|entry| entry.state == PluginRunState::AssumedRunning)
                    .unwrap_or(false);
                assumed && plugins.remove(key).is_some()
            }
            Err(_) => false,
        };
        if removed {
            warn!(plugin = %key, "Plugin process exited without ever registering");
            self.inner.menus.unregister_menu_items_by_plugin(key);
            self.notify_plugins();
        }
    }

    /// Run one plugin connection until the peer disconnects or the host shuts
    /// down. Messages on one connection are handled in arrival order.
    pub async fn serve_connection<S>(self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, writer) = tokio::io::split(stream);
        let connection = Arc::new(PluginConnection::new(peer.clone(), writer));
        debug!(peer = %peer, "Plugin connected");

        let mut buffer = MessageBuffer::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let read = tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                read = reader.read(&mut chunk) => read,
            };
            let n = match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(peer = %peer, "Plugin socket error: {}", e);
                    break;
                }
            };

            buffer.push(&chunk[..n]);
            for envelope in buffer.drain_envelopes() {
                match envelope {
                    Ok(envelope) => self.dispatch(&connection, envelope),
                    Err(e) => warn!(peer = %peer, "Ignoring malformed plugin message: {}", e),
                }
            }
        }

        self.handle_disconnect(&connection);
    }

    // ========================================================================
    // Message Dispatch
    // ========================================================================

    fn dispatch(&self, connection: &Arc<PluginConnection>, envelope: Envelope) {
        debug!(
            peer = %connection.peer(),
            kind = envelope.message.kind(),
            id = ?envelope.id,
            "plugin ->"
        );

        match envelope.message {
            PluginMessage::RegisterPlugin(info) => self.register_plugin(connection, info),
            PluginMessage::RegisterMenu(payload) => self.register_menu(connection, payload),
            PluginMessage::ExecuteMenuAction(action) => {
                self.spawn_menu_action(connection, envelope.id, action)
            }
            PluginMessage::PluginResponse(response) => match envelope.id {
                Some(id) => {
                    connection.handle_response(id, response);
                }
                None => warn!(peer = %connection.peer(), "Ignoring plugin-response without id"),
            },
            PluginMessage::ExecutePlugin(_) => {
                warn!(
                    peer = %connection.peer(),
                    "Protocol error: plugins may not send execute-plugin"
                );
            }
        }
    }

    fn register_plugin(&self, connection: &Arc<PluginConnection>, mut info: PluginInfo) {
        let key = info.key();
        if key.is_empty() {
            warn!(peer = %connection.peer(), "Ignoring register-plugin without a name");
            return;
        }
        info.installed = self.inner.installer.is_installed(&info.name);

        let previous_key = connection.plugin_key();
        connection.bind(info.clone());

        if let Ok(mut plugins) = self.inner.plugins.write() {
            // A connection re-registering under another name leaves its old slot
            if let Some(old) = previous_key.filter(|old| *old != key) {
                if owns_entry(plugins.get(&old), connection) {
                    plugins.remove(&old);
                }
            }
            match plugins.get(&key) {
                Some(existing) if existing.state == PluginRunState::AssumedRunning => {
                    info!(plugin = %key, "Handshake arrived for assumed-running plugin");
                }
                Some(existing) if !owns_entry(Some(existing), connection) => {
                    info!(plugin = %key, "Plugin reconnected, replacing previous connection");
                }
                _ => {}
            }
            plugins.insert(
                key.clone(),
                PluginEntry {
                    info: info.clone(),
                    state: PluginRunState::Registered,
                    connection: Some(Arc::clone(connection)),
                },
            );
        }

        info!(plugin = %info.name, version = %info.version, peer = %connection.peer(), "Plugin registered");
        let _ = self.inner.registrations.send(key);
        self.notify_plugins();
    }

    fn register_menu(&self, connection: &Arc<PluginConnection>, payload: RegisterMenuPayload) {
        let claimed = normalize_plugin_name(&payload.plugin_name);
        let Some(key) = connection.plugin_key() else {
            warn!(peer = %connection.peer(), claimed = %claimed, "Rejecting register-menu before register-plugin");
            return;
        };
        if !claimed.is_empty() && claimed != key {
            warn!(plugin = %key, claimed = %claimed, "register-menu names another plugin, using the connection's plugin");
        }

        let known = self
            .inner
            .plugins
            .read()
            .map(|plugins| plugins.contains_key(&key))
            .unwrap_or(false);
        if !known {
            warn!(plugin = %key, "Rejecting menu items for unknown plugin");
            return;
        }

        debug!(plugin = %key, items = payload.menu_items.len(), "Registering plugin menu");
        self.inner.menus.replace_plugin_items(&key, payload.menu_items);
    }

    fn spawn_menu_action(
        &self,
        connection: &Arc<PluginConnection>,
        id: Option<u64>,
        action: MenuActionPayload,
    ) {
        let manager = self.clone();
        let connection = Arc::clone(connection);
        tokio::spawn(async move {
            let response = manager.execute_menu_action(action).await;
            if let Some(id) = id {
                if let Err(e) = connection.reply(id, response).await {
                    warn!(peer = %connection.peer(), "Failed to answer menu action: {}", e);
                }
            }
        });
    }

    /// Run the plugin owning a menu item. Failures become a `success: false`
    /// response so they can be sent back over the wire.
    pub async fn execute_menu_action(&self, action: MenuActionPayload) -> PluginResponse {
        let Some(item) = self.inner.menus.get_menu_item(&action.menu_item_id) else {
            warn!(item = %action.menu_item_id, "Menu action for unknown item");
            return PluginResponse::err(format!("Unknown menu item '{}'", action.menu_item_id));
        };

        let result = self
            .execute_plugin(
                &item.plugin_id,
                action.content.unwrap_or_default(),
                action.file_path,
                action.options,
            )
            .await;
        match result {
            Ok(response) => response,
            Err(e) => {
                warn!(plugin = %item.plugin_id, item = %item.id, "Menu action failed: {}", e);
                PluginResponse::err(e.to_string())
            }
        }
    }

    fn handle_disconnect(&self, connection: &Arc<PluginConnection>) {
        connection.fail_pending();
        let Some(key) = connection.plugin_key() else {
            debug!(peer = %connection.peer(), "Unregistered connection closed");
            return;
        };

        let removed = match self.inner.plugins.write() {
            Ok(mut plugins) if owns_entry(plugins.get(&key), connection) => {
                plugins.remove(&key);
                true
            }
            _ => false,
        };
        if !removed {
            debug!(plugin = %key, "Stale connection closed");
            return;
        }

        info!(plugin = %key, "Plugin disconnected");
        self.inner.menus.unregister_menu_items_by_plugin(&key);
        self.notify_plugins();
    }

    fn connection_for(&self, key: &str) -> Option<Arc<PluginConnection>> {
        self.inner
            .plugins
            .read()
            .ok()
            .and_then(|plugins| plugins.get(key).and_then(|entry| entry.connection.clone()))
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run plugin `name` on editor content.
    ///
    /// An installed plugin that isn't connected is started once and the
    /// execution retried once.
    pub async fn execute_plugin(
        &self,
        name: &str,
        content: String,
        file_path: Option<String>,
        options: Option<Value>,
    ) -> AppResult<PluginResponse> {
        let key = normalize_plugin_name(name);
        let payload = ExecutePayload {
            content,
            file_path,
            options,
        };

        if let Some(connection) = self.connection_for(&key) {
            return self.execute_on(name, &connection, payload).await;
        }

        if !self.inner.installer.is_installed(name) {
            return Err(AppError::NotStartable(name.to_string()));
        }

        info!(plugin = %name, "Plugin not connected, starting it");
        if let Err(e) = self.start_plugin(name).await {
            warn!(plugin = %name, "Failed to start plugin: {}", e);
        }

        match self.connection_for(&key) {
            Some(connection) => self.execute_on(name, &connection, payload).await,
            None => Err(AppError::NotStartable(name.to_string())),
        }
    }

    async fn execute_on(
        &self,
        name: &str,
        connection: &PluginConnection,
        payload: ExecutePayload,
    ) -> AppResult<PluginResponse> {
        let (id, response) = connection
            .request(PluginMessage::ExecutePlugin(payload))
            .await?;

        let budget = self.inner.config.execute_timeout();
        match tokio::time::timeout(budget, response).await {
            Ok(Ok(response)) if response.success => Ok(response),
            Ok(Ok(response)) => Err(AppError::PluginFailure(response.message)),
            Ok(Err(_)) => Err(AppError::transport(format!(
                "plugin '{}' disconnected before responding",
                name
            ))),
            Err(_) => {
                connection.cancel(id);
                error!(plugin = %name, id, "Plugin execution timed out");
                Err(AppError::Timeout {
                    plugin: name.to_string(),
                    timeout_ms: self.inner.config.execute_timeout_ms,
                })
            }
        }
    }

    /// Make sure plugin `name` is running.
    ///
    /// Spawns the plugin's entry point unless a process is already alive, then
    /// waits for its handshake. Without a handshake in time, a plugin whose
    /// process is still alive is recorded as assumed running.
    pub async fn start_plugin(&self, name: &str) -> AppResult<PluginInfo> {
        let key = normalize_plugin_name(name);
        if let Some(info) = self.registered_info(&key) {
            return Ok(info);
        }

        let installed = self
            .inner
            .installer
            .load_installed(name)
            .ok_or_else(|| AppError::NotStartable(name.to_string()))?;
        let entry = resolve_entry_point(&installed.dir, &installed.manifest).ok_or_else(|| {
            warn!(plugin = %name, dir = %installed.dir.display(), "No entry point found");
            AppError::NotStartable(name.to_string())
        })?;
        let port = self
            .local_port()
            .ok_or_else(|| AppError::internal("plugin host is not started"))?;

        // Subscribe before spawning so a fast handshake isn't missed
        let mut registrations = self.inner.registrations.subscribe();
        self.inner
            .processes
            .spawn(&key, &entry, &installed.dir, port)?;

        let wait_for_handshake = async {
            loop {
                match registrations.recv().await {
                    Ok(registered) if registered == key => return true,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.connection_for(&key).is_some() {
                            return true;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        };
        let handshake = self.inner.config.handshake_timeout();
        let _ = tokio::time::timeout(handshake, wait_for_handshake).await;

        if let Some(info) = self.registered_info(&key) {
            return Ok(info);
        }

        if !self.inner.processes.is_running(&key) {
            warn!(plugin = %name, "Plugin process exited before registering");
            return Err(AppError::NotStartable(name.to_string()));
        }

        warn!(
            plugin = %name,
            "No handshake within {}ms, assuming the plugin is running",
            self.inner.config.handshake_timeout_ms
        );
        let info = installed.manifest.to_info(true);
        let inserted = match self.inner.plugins.write() {
            Ok(mut plugins) => match plugins.get(&key) {
                Some(existing) => return Ok(existing.info.clone()),
                None => {
                    plugins.insert(
                        key.clone(),
                        PluginEntry {
                            info: info.clone(),
                            state: PluginRunState::AssumedRunning,
                            connection: None,
                        },
                    );
                    true
                }
            },
            Err(_) => false,
        };
        if inserted {
            self.notify_plugins();
            // The process may have exited between the liveness check and the insert
            self.handle_process_exit(&key);
        }
        Ok(info)
    }

    fn registered_info(&self, key: &str) -> Option<PluginInfo> {
        self.inner.plugins.read().ok().and_then(|plugins| {
            plugins
                .get(key)
                .filter(|entry| entry.connection.is_some())
                .map(|entry| entry.info.clone())
        })
    }

    // ========================================================================
    // Install / Uninstall
    // ========================================================================

    /// Install plugin `name` (or reuse an existing installation) and start it.
    ///
    /// Start failures are logged; the installed plugin is returned either way.
    pub async fn install_plugin(&self, name: &str) -> AppResult<PluginInfo> {
        let installed = self.inner.installer.install(name).await?;
        let info = installed.manifest.to_info(true);

        if let Err(e) = self.start_plugin(name).await {
            warn!(plugin = %name, "Installed plugin failed to start: {}", e);
        }

        self.notify_plugins();
        Ok(info)
    }

    /// Stop and remove plugin `name`. Always reports success; problems are
    /// logged.
    pub async fn uninstall_plugin(&self, name: &str) -> bool {
        match self.try_uninstall(name).await {
            Ok(report) => {
                for failure in &report.failures {
                    warn!(plugin = %name, "Uninstall step failed: {}", failure);
                }
                info!(plugin = %name, removed = report.removed.len(), "Plugin uninstalled");
            }
            Err(e) => warn!(plugin = %name, "Uninstall failed: {}", e),
        }
        true
    }

    async fn try_uninstall(&self, name: &str) -> AppResult<UninstallReport> {
        let key = normalize_plugin_name(name);

        let removed: Vec<PluginEntry> = match self.inner.plugins.write() {
            Ok(mut plugins) => [name, key.as_str()]
                .iter()
                .filter_map(|k| plugins.remove(*k))
                .collect(),
            Err(_) => Vec::new(),
        };
        for entry in &removed {
            if let Some(connection) = &entry.connection {
                connection.fail_pending();
            }
        }

        self.inner.menus.unregister_menu_items_by_plugin(name);
        if key != name {
            self.inner.menus.unregister_menu_items_by_plugin(&key);
        }

        self.inner.processes.stop(&key).await;

        let result = self.inner.installer.uninstall(name).await;
        self.notify_plugins();
        result
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Live plugins (registered or assumed running), sorted by name.
    pub fn get_plugins(&self) -> Vec<PluginInfo> {
        let mut plugins: Vec<PluginInfo> = self
            .inner
            .plugins
            .read()
            .map(|plugins| plugins.values().map(|entry| entry.info.clone()).collect())
            .unwrap_or_default();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        plugins
    }

    /// Run state of a live plugin.
    pub fn plugin_state(&self, name: &str) -> Option<PluginRunState> {
        let key = normalize_plugin_name(name);
        self.inner
            .plugins
            .read()
            .ok()
            .and_then(|plugins| plugins.get(&key).map(|entry| entry.state))
    }

    /// Registry listing with install state (filesystem or live).
    pub async fn get_available_plugins(&self) -> AppResult<Vec<AvailablePlugin>> {
        let mut available = self.inner.installer.list_available().await?;
        for plugin in &mut available {
            plugin.installed = plugin.installed || self.is_live(&plugin.name);
        }
        Ok(available)
    }

    /// Whether `name` is installed on disk or currently live, by normalized name.
    pub fn is_plugin_installed(&self, name: &str) -> bool {
        self.is_live(name) || self.inner.installer.is_installed(name)
    }

    fn is_live(&self, name: &str) -> bool {
        let key = normalize_plugin_name(name);
        self.inner
            .plugins
            .read()
            .map(|plugins| plugins.contains_key(&key))
            .unwrap_or(false)
    }

    pub fn get_menu_items_for_parent(&self, parent_menu: &str) -> Vec<MenuItem> {
        self.inner.menus.get_menu_items_for_parent(parent_menu)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Called with the live plugin list whenever it changes.
    pub fn subscribe_plugins<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&[PluginInfo]) + Send + Sync + 'static,
    {
        self.inner.plugin_listeners.add(listener)
    }

    pub fn unsubscribe_plugins(&self, id: ListenerId) -> bool {
        self.inner.plugin_listeners.remove(id)
    }

    /// Called with every menu item whenever the menu registry changes.
    pub fn subscribe_menus<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&[MenuItem]) + Send + Sync + 'static,
    {
        self.inner.menus.add_listener(listener)
    }

    pub fn unsubscribe_menus(&self, id: ListenerId) -> bool {
        self.inner.menus.remove_listener(id)
    }

    fn notify_plugins(&self) {
        let plugins = self.get_plugins();
        self.inner.plugin_listeners.notify(&plugins);
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("local_port", &self.local_port())
            .field("plugins", &self.get_plugins().len())
            .field("processes", &self.inner.processes)
            .finish()
    }
}

fn owns_entry(entry: Option<&PluginEntry>, connection: &Arc<PluginConnection>) -> bool {
    entry
        .and_then(|entry| entry.connection.as_ref())
        .map(|owner| Arc::ptr_eq(owner, connection))
        .unwrap_or(false)
}

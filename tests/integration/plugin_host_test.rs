//! Plugin Host Integration Tests
//!
//! Drives a started `PluginManager` through real loopback sockets, the way
//! plugin processes talk to the editor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use inkpad_core::{Envelope, MessageBuffer, PluginMessage};
use inkpad_desktop::services::plugins::{
    LocalPackageRegistry, MenuRegistry, PluginInstaller, PluginManager, PluginRunState,
};
use inkpad_desktop::{AppConfig, AppError};

// ============================================================================
// Helper Functions
// ============================================================================

fn host(root: &TempDir, execute_timeout_ms: u64, handshake_timeout_ms: u64) -> PluginManager {
    let config = AppConfig {
        plugin_port: 0,
        execute_timeout_ms,
        handshake_timeout_ms,
        ..Default::default()
    };
    let registry_dir = root.path().join("registry");
    std::fs::create_dir_all(&registry_dir).unwrap();
    let installer = PluginInstaller::new(
        root.path().join("plugins"),
        Arc::new(LocalPackageRegistry::new(registry_dir)),
        &config,
    )
    .unwrap();
    PluginManager::new(config, Arc::new(installer), Arc::new(MenuRegistry::new()))
}

/// A plugin process stand-in speaking the wire protocol over TCP.
struct SocketPlugin {
    stream: TcpStream,
    buffer: MessageBuffer,
}

impl SocketPlugin {
    async fn connect(manager: &PluginManager) -> Self {
        let port = manager.local_port().expect("host not started");
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        Self {
            stream,
            buffer: MessageBuffer::new(),
        }
    }

    async fn send(&mut self, value: Value) {
        let mut bytes = serde_json::to_vec(&value).unwrap();
        bytes.push(b'\n');
        self.stream.write_all(&bytes).await.unwrap();
    }

    async fn register(&mut self, name: &str, version: &str) {
        self.send(json!({"type": "register-plugin", "payload": {"name": name, "version": version}}))
            .await;
    }

    async fn register_menu(&mut self, plugin_name: &str, ids: &[&str]) {
        let items: Vec<Value> = ids
            .iter()
            .map(|id| json!({"id": id, "label": id, "parentMenu": "Tools"}))
            .collect();
        self.send(json!({"type": "register-menu", "payload": {"pluginName": plugin_name, "menuItems": items}}))
            .await;
    }

    async fn next(&mut self) -> Envelope {
        let read = async {
            let mut chunk = [0u8; 4096];
            loop {
                if let Some(envelope) = self.buffer.drain_envelopes().into_iter().next() {
                    return envelope.unwrap();
                }
                let n = self.stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "host closed the connection");
                self.buffer.push(&chunk[..n]);
            }
        };
        tokio::time::timeout(Duration::from_secs(5), read)
            .await
            .expect("no message from host")
    }

    async fn respond(&mut self, id: u64, data: Value) {
        self.send(json!({"type": "plugin-response", "id": id, "payload": {"success": true, "message": "ok", "data": data}}))
            .await;
    }
}

async fn eventually<F: Fn() -> bool>(check: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn execute_content(envelope: &Envelope) -> String {
    match &envelope.message {
        PluginMessage::ExecutePlugin(payload) => payload.content.clone(),
        other => panic!("expected execute-plugin, got {:?}", other),
    }
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_versioned_registration_resolves_base_name() {
    let root = TempDir::new().unwrap();
    let manager = host(&root, 1000, 200);
    manager.start().await.unwrap();

    let mut plugin = SocketPlugin::connect(&manager).await;
    plugin.register("autosave-1.0.0", "1.0.0").await;
    plugin.register_menu("autosave-1.0.0", &["autosave.toggle"]).await;
    eventually(|| manager.get_menu_items_for_parent("Tools").len() == 1).await;

    assert!(manager.is_plugin_installed("autosave"));
    assert!(manager.is_plugin_installed("autosave-1.0.0"));
    assert!(!manager.is_plugin_installed("autosave-pro"));
    assert_eq!(manager.plugin_state("autosave-2.0.0"), Some(PluginRunState::Registered));

    let plugins = manager.get_plugins();
    assert_eq!(plugins.len(), 1);
    assert_eq!(plugins[0].name, "autosave-1.0.0");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_purges_menus() {
    let root = TempDir::new().unwrap();
    let manager = host(&root, 1000, 200);
    manager.start().await.unwrap();

    let mut plugin = SocketPlugin::connect(&manager).await;
    plugin.register("word-count", "1.0.0").await;
    plugin.register_menu("word-count", &["wc.words", "wc.chars"]).await;

    let mut other = SocketPlugin::connect(&manager).await;
    other.register("upper", "0.1.0").await;
    other.register_menu("upper", &["upper.run"]).await;
    eventually(|| manager.get_menu_items_for_parent("Tools").len() == 3).await;

    drop(plugin);
    eventually(|| manager.get_menu_items_for_parent("Tools").len() == 1).await;

    assert!(!manager.is_plugin_installed("word-count"));
    assert_eq!(manager.get_menu_items_for_parent("Tools")[0].plugin_id, "upper");
    assert_eq!(manager.get_plugins().len(), 1);

    manager.shutdown().await;
}

// ============================================================================
// Execution
// ============================================================================

#[tokio::test]
async fn test_execute_times_out_within_budget() {
    let root = TempDir::new().unwrap();
    let manager = host(&root, 150, 200);
    manager.start().await.unwrap();

    let mut plugin = SocketPlugin::connect(&manager).await;
    plugin.register("slow", "1.0.0").await;
    eventually(|| manager.is_plugin_installed("slow")).await;

    let started = Instant::now();
    let host = manager.clone();
    let call =
        tokio::spawn(async move { host.execute_plugin("slow", "x".to_string(), None, None).await });
    let request = plugin.next().await;

    let err = call.await.unwrap().unwrap_err();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(150), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "returned after {:?}", elapsed);
    match err {
        AppError::Timeout { plugin, timeout_ms } => {
            assert_eq!(plugin, "slow");
            assert_eq!(timeout_ms, 150);
        }
        other => panic!("expected timeout, got {:?}", other),
    }

    // A late answer is dropped and the connection keeps working
    plugin.respond(request.id.unwrap(), json!("late")).await;
    let host = manager.clone();
    let call =
        tokio::spawn(async move { host.execute_plugin("slow", "y".to_string(), None, None).await });
    let request = plugin.next().await;
    assert_eq!(execute_content(&request), "y");
    plugin.respond(request.id.unwrap(), json!("fresh")).await;
    assert_eq!(call.await.unwrap().unwrap().data, Some(json!("fresh")));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_out_of_order_responses_are_correlated() {
    let root = TempDir::new().unwrap();
    let manager = host(&root, 5000, 200);
    manager.start().await.unwrap();

    let mut plugin = SocketPlugin::connect(&manager).await;
    plugin.register("upper", "1.0.0").await;
    eventually(|| manager.is_plugin_installed("upper")).await;

    let first_host = manager.clone();
    let first = tokio::spawn(async move {
        first_host
            .execute_plugin("upper", "first".to_string(), None, None)
            .await
    });
    let a = plugin.next().await;

    let second_host = manager.clone();
    let second = tokio::spawn(async move {
        second_host
            .execute_plugin("upper", "second".to_string(), None, None)
            .await
    });
    let b = plugin.next().await;
    assert_ne!(a.id, b.id);

    // Answer in reverse order
    plugin
        .respond(b.id.unwrap(), json!(execute_content(&b).to_uppercase()))
        .await;
    plugin
        .respond(a.id.unwrap(), json!(execute_content(&a).to_uppercase()))
        .await;

    assert_eq!(first.await.unwrap().unwrap().data, Some(json!("FIRST")));
    assert_eq!(second.await.unwrap().unwrap().data, Some(json!("SECOND")));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_fails_pending_execution() {
    let root = TempDir::new().unwrap();
    let manager = host(&root, 5000, 200);
    manager.start().await.unwrap();

    let mut plugin = SocketPlugin::connect(&manager).await;
    plugin.register("crashy", "1.0.0").await;
    eventually(|| manager.is_plugin_installed("crashy")).await;

    let host = manager.clone();
    let call =
        tokio::spawn(async move { host.execute_plugin("crashy", String::new(), None, None).await });
    plugin.next().await;

    let started = Instant::now();
    drop(plugin);
    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, AppError::Transport(_)), "got {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(3));

    manager.shutdown().await;
}

// ============================================================================
// Process supervision
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_silent_plugin_is_assumed_running() {
    let root = TempDir::new().unwrap();
    let plugin_dir = root.path().join("plugins").join("sleeper");
    std::fs::create_dir_all(&plugin_dir).unwrap();
    std::fs::write(
        plugin_dir.join("plugin.json"),
        r#"{"name": "sleeper", "version": "1.0.0", "main": "sleeper.sh"}"#,
    )
    .unwrap();
    std::fs::write(plugin_dir.join("sleeper.sh"), "exec sleep 30\n").unwrap();

    let manager = host(&root, 1000, 200);
    manager.start().await.unwrap();

    assert_eq!(manager.plugin_state("sleeper"), Some(PluginRunState::AssumedRunning));
    assert_eq!(manager.get_plugins()[0].name, "sleeper");

    // Executing needs a socket, which an assumed-running plugin never opened
    let err = manager
        .execute_plugin("sleeper", String::new(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotStartable(_)), "got {:?}", err);

    assert!(manager.uninstall_plugin("sleeper").await);
    assert_eq!(manager.plugin_state("sleeper"), None);
    assert!(!plugin_dir.exists());

    manager.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_plugin_exiting_early_is_not_started() {
    let root = TempDir::new().unwrap();
    let plugin_dir = root.path().join("plugins").join("quitter");
    std::fs::create_dir_all(&plugin_dir).unwrap();
    std::fs::write(
        plugin_dir.join("plugin.json"),
        r#"{"name": "quitter", "main": "quitter.sh"}"#,
    )
    .unwrap();
    std::fs::write(plugin_dir.join("quitter.sh"), "exit 0\n").unwrap();

    let manager = host(&root, 1000, 300);
    manager.start().await.unwrap();

    assert!(manager.get_plugins().is_empty());
    let err = manager.start_plugin("quitter").await.unwrap_err();
    assert!(matches!(err, AppError::NotStartable(_)));

    manager.shutdown().await;
}

/// Lay out an installed package `<plugins>/<dir>/` with a manifest and one script.
#[cfg(unix)]
fn write_plugin(root: &TempDir, dir: &str, manifest: &str, script: (&str, &str)) -> std::path::PathBuf {
    let plugin_dir = root.path().join("plugins").join(dir);
    std::fs::create_dir_all(&plugin_dir).unwrap();
    std::fs::write(plugin_dir.join("plugin.json"), manifest).unwrap();
    std::fs::write(plugin_dir.join(script.0), script.1).unwrap();
    plugin_dir
}

#[cfg(unix)]
#[tokio::test]
async fn test_assumed_plugin_is_dropped_when_its_process_exits() {
    let root = TempDir::new().unwrap();
    let plugin_dir = write_plugin(
        &root,
        "fader",
        r#"{"name": "fader", "main": "fader.sh"}"#,
        ("fader.sh", "sleep 0.6\nexit 1\n"),
    );

    let manager = host(&root, 1000, 200);
    let events = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&events);
    manager.subscribe_plugins(move |_| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });
    manager.start().await.unwrap();
    assert_eq!(manager.plugin_state("fader"), Some(PluginRunState::AssumedRunning));

    eventually(|| manager.plugin_state("fader").is_none()).await;
    assert!(manager.get_plugins().is_empty());
    assert_eq!(events.load(std::sync::atomic::Ordering::SeqCst), 2);

    std::fs::remove_dir_all(&plugin_dir).unwrap();
    assert!(!manager.is_plugin_installed("fader"));

    manager.shutdown().await;
}

/// A python plugin that reads `--port=<n>`, connects back, registers after
/// `delay` seconds and upper-cases the content of every execute request.
#[cfg(unix)]
const ECHO_PLUGIN: &str = r#"import json, socket, sys, time

port = next(int(a.split("=", 1)[1]) for a in sys.argv[1:] if a.startswith("--port="))
time.sleep(DELAY)
sock = socket.create_connection(("127.0.0.1", port))
sock.sendall(json.dumps({"type": "register-plugin", "payload": {"name": "NAME", "version": "1.0.0"}}).encode())

decoder = json.JSONDecoder()
pending = ""
while True:
    data = sock.recv(65536)
    if not data:
        break
    pending += data.decode()
    while pending.strip():
        try:
            msg, end = decoder.raw_decode(pending.lstrip())
        except ValueError:
            break
        pending = pending.lstrip()[end:]
        if msg.get("type") == "execute-plugin":
            reply = {
                "type": "plugin-response",
                "id": msg["id"],
                "payload": {"success": True, "message": "ok", "data": msg["payload"]["content"].upper()},
            }
            sock.sendall(json.dumps(reply).encode())
"#;

#[cfg(unix)]
fn python3_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
fn write_echo_plugin(root: &TempDir, name: &str, delay_secs: f32) {
    let script = ECHO_PLUGIN
        .replace("DELAY", &delay_secs.to_string())
        .replace("NAME", name);
    write_plugin(
        root,
        name,
        &format!(r#"{{"name": "{}", "version": "1.0.0", "main": "plugin.py"}}"#, name),
        ("plugin.py", &script),
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_execute_starts_installed_plugin_and_retries() {
    if !python3_available() {
        return;
    }
    let root = TempDir::new().unwrap();
    let manager = host(&root, 5000, 5000);
    manager.start().await.unwrap();

    // Installed after start, so nothing is running yet
    write_echo_plugin(&root, "shout", 0.0);
    assert!(manager.get_plugins().is_empty());

    let response = manager
        .execute_plugin("shout", "hello".to_string(), None, None)
        .await
        .unwrap();
    assert_eq!(response.data, Some(json!("HELLO")));
    assert_eq!(manager.plugin_state("shout"), Some(PluginRunState::Registered));

    manager.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_late_handshake_upgrades_assumed_entry() {
    if !python3_available() {
        return;
    }
    let root = TempDir::new().unwrap();
    write_echo_plugin(&root, "tardy", 0.5);

    let manager = host(&root, 5000, 100);
    manager.start().await.unwrap();
    assert_eq!(manager.plugin_state("tardy"), Some(PluginRunState::AssumedRunning));

    eventually(|| manager.plugin_state("tardy") == Some(PluginRunState::Registered)).await;
    assert_eq!(manager.get_plugins().len(), 1);

    let response = manager
        .execute_plugin("tardy", "late".to_string(), None, None)
        .await
        .unwrap();
    assert_eq!(response.data, Some(json!("LATE")));

    manager.shutdown().await;
}

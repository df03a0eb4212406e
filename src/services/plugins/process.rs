//! Plugin Processes
//!
//! Entry-point resolution and supervision of plugin child processes. Each
//! plugin runs as its own OS process launched with `--port=<n>`; it connects
//! back to the host over loopback TCP. The process table only tracks the
//! children, the socket side lives in the manager.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use inkpad_core::normalize_plugin_name;

use crate::services::plugins::models::PluginManifest;
use crate::utils::error::{AppError, AppResult};

/// Subdirectories searched for a conventional entry script, in order.
const ENTRY_DIRS: &[&str] = &["", "dist", "src", "lib", "bin"];

/// Script extensions the host knows how to launch.
const ENTRY_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "py", "sh"];

/// Directory levels searched when no conventional entry exists.
const SCAN_DEPTH: usize = 2;

/// How long `stop` waits for a killed child to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Entry Points
// ============================================================================

/// Find the script that starts the plugin in `dir`.
///
/// Order: the manifest's `main`, then `<sub>/<stem>.<ext>` for the
/// conventional subdirectories and stems (plugin name, `main`, `index`),
/// then any script within two directory levels, preferring those stems.
pub fn resolve_entry_point(dir: &Path, manifest: &PluginManifest) -> Option<PathBuf> {
    if let Some(main) = manifest.main.as_deref().filter(|m| !m.trim().is_empty()) {
        let relative = Path::new(main.trim());
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if contained && dir.join(relative).is_file() {
            return Some(dir.join(relative));
        }
        debug!(plugin = %manifest.name, main = %main, "Declared entry point not found");
    }

    let stems = entry_stems(dir, manifest);

    for sub in ENTRY_DIRS {
        let base = if sub.is_empty() { dir.to_path_buf() } else { dir.join(sub) };
        if !base.is_dir() {
            continue;
        }
        for stem in &stems {
            for ext in ENTRY_EXTENSIONS {
                let candidate = base.join(format!("{}.{}", stem, ext));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
    }

    let mut scripts = Vec::new();
    collect_scripts(dir, 0, &mut scripts);
    scripts
        .into_iter()
        .min_by_key(|(path, depth)| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let rank = stems.iter().position(|s| *s == stem).unwrap_or(stems.len());
            (rank, *depth, path.clone())
        })
        .map(|(path, _)| path)
}

fn entry_stems(dir: &Path, manifest: &PluginManifest) -> Vec<String> {
    let mut stems = Vec::new();
    let mut push = |stem: String| {
        if !stem.is_empty() && !stems.contains(&stem) {
            stems.push(stem);
        }
    };
    push(manifest.key());
    if let Some(name) = dir.file_name() {
        push(normalize_plugin_name(&name.to_string_lossy()));
    }
    push("plugin".to_string());
    push("main".to_string());
    push("index".to_string());
    stems
}

fn collect_scripts(dir: &Path, depth: usize, out: &mut Vec<(PathBuf, usize)>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            if name != "node_modules" && depth < SCAN_DEPTH {
                subdirs.push(path);
            }
        } else if path
            .extension()
            .map(|ext| ENTRY_EXTENSIONS.iter().any(|known| ext == *known))
            .unwrap_or(false)
        {
            out.push((path, depth));
        }
    }
    for sub in subdirs {
        collect_scripts(&sub, depth + 1, out);
    }
}

/// Interpreter for a script, or `None` to execute the file directly.
pub fn interpreter_for(entry: &Path) -> Option<&'static str> {
    let ext = entry.extension()?.to_string_lossy().to_ascii_lowercase();
    match ext.as_str() {
        "js" | "mjs" | "cjs" => Some("node"),
        "py" => Some("python3"),
        "sh" => Some("sh"),
        _ => None,
    }
}

// ============================================================================
// Process Table
// ============================================================================

struct TrackedProcess {
    generation: u64,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
}

/// Child processes keyed by normalized plugin name.
#[derive(Clone, Default)]
pub struct ProcessTable {
    processes: Arc<Mutex<HashMap<String, TrackedProcess>>>,
    next_generation: Arc<AtomicU64>,
    /// Receives the key of every process that exits on its own
    exits: Option<mpsc::UnboundedSender<String>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that reports processes exiting on their own (not through
    /// `stop`) on `exits`.
    pub fn with_exit_notifier(exits: mpsc::UnboundedSender<String>) -> Self {
        Self {
            exits: Some(exits),
            ..Self::default()
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        let key = normalize_plugin_name(name);
        self.processes
            .lock()
            .map(|table| table.contains_key(&key))
            .unwrap_or(false)
    }

    pub fn pid(&self, name: &str) -> Option<u32> {
        let key = normalize_plugin_name(name);
        self.processes
            .lock()
            .ok()
            .and_then(|table| table.get(&key).and_then(|p| p.pid))
    }

    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .processes
            .lock()
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Launch `entry` for plugin `name` with `--port=<port>`.
    ///
    /// Returns `Ok(false)` without spawning when the plugin already has a live
    /// process. The child's stdout and stderr are forwarded to the log.
    pub fn spawn(&self, name: &str, entry: &Path, cwd: &Path, port: u16) -> AppResult<bool> {
        let key = normalize_plugin_name(name);
        let mut table = self
            .processes
            .lock()
            .map_err(|_| AppError::internal("process table poisoned"))?;
        if table.contains_key(&key) {
            debug!(plugin = %key, "Plugin process already running");
            return Ok(false);
        }

        let mut cmd = match interpreter_for(entry) {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(entry);
                cmd
            }
            None => Command::new(entry),
        };
        cmd.arg(format!("--port={}", port))
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            AppError::NotStartable(format!("{} ({}: {})", key, entry.display(), e))
        })?;
        let pid = child.id();
        info!(plugin = %key, pid = ?pid, entry = %entry.display(), "Spawned plugin process");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(key.clone(), stdout, OutputStream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(key.clone(), stderr, OutputStream::Stderr));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let processes = Arc::clone(&self.processes);
        let exits = self.exits.clone();
        let plugin = key.clone();

        // The supervisor can't observe the table before we insert below, since
        // we still hold the lock.
        let supervisor = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => info!(plugin = %plugin, %status, "Plugin process exited"),
                    Err(e) => warn!(plugin = %plugin, "Failed to wait for plugin process: {}", e),
                },
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(plugin = %plugin, "Failed to kill plugin process: {}", e);
                    }
                    debug!(plugin = %plugin, "Plugin process stopped");
                }
            }

            // `stop` removes the entry before killing, so a matching
            // generation here means the process went away on its own.
            let removed = match processes.lock() {
                Ok(mut table) if table.get(&plugin).map(|p| p.generation) == Some(generation) => {
                    table.remove(&plugin);
                    true
                }
                _ => false,
            };
            if removed {
                if let Some(exits) = exits {
                    let _ = exits.send(plugin);
                }
            }
        });

        table.insert(
            key,
            TrackedProcess {
                generation,
                pid,
                kill_tx: Some(kill_tx),
                supervisor,
            },
        );
        Ok(true)
    }

    /// Kill and reap the process of `name`. Returns false if none was tracked.
    pub async fn stop(&self, name: &str) -> bool {
        let key = normalize_plugin_name(name);
        let tracked = match self.processes.lock() {
            Ok(mut table) => table.remove(&key),
            Err(_) => None,
        };
        match tracked {
            Some(process) => {
                Self::terminate(&key, process).await;
                true
            }
            None => false,
        }
    }

    /// Kill and reap every tracked process.
    pub async fn stop_all(&self) {
        let drained: Vec<(String, TrackedProcess)> = match self.processes.lock() {
            Ok(mut table) => table.drain().collect(),
            Err(_) => Vec::new(),
        };
        let stops = drained
            .into_iter()
            .map(|(key, process)| async move { Self::terminate(&key, process).await });
        futures_util::future::join_all(stops).await;
    }

    async fn terminate(key: &str, mut process: TrackedProcess) {
        if let Some(kill) = process.kill_tx.take() {
            let _ = kill.send(());
        }
        if tokio::time::timeout(REAP_TIMEOUT, &mut process.supervisor)
            .await
            .is_err()
        {
            warn!(plugin = %key, "Plugin process did not exit in time, aborting supervisor");
            process.supervisor.abort();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Log every line a plugin writes until the stream closes. Lines that are not
/// valid UTF-8 are logged lossily; the pipe is never closed early, so the
/// child can't die of a broken pipe.
async fn forward_output<R>(plugin: String, stream: R, kind: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                match kind {
                    OutputStream::Stdout => info!(plugin = %plugin, "{}", line),
                    OutputStream::Stderr => warn!(plugin = %plugin, "{}", line),
                }
            }
            Err(e) => {
                debug!(plugin = %plugin, "Plugin output stream closed: {}", e);
                break;
            }
        }
    }
}

impl std::fmt::Debug for ProcessTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTable")
            .field("running", &self.running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest(name: &str, main: Option<&str>) -> PluginManifest {
        PluginManifest {
            name: name.to_string(),
            main: main.map(str::to_string),
            ..Default::default()
        }
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn test_declared_main_wins() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("index.js"));
        touch(&dir.path().join("build/run.js"));

        let entry = resolve_entry_point(dir.path(), &manifest("x", Some("build/run.js")));
        assert_eq!(entry.unwrap(), dir.path().join("build/run.js"));
    }

    #[test]
    fn test_main_outside_package_is_ignored() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("index.js"));

        let entry = resolve_entry_point(dir.path(), &manifest("x", Some("../evil.js")));
        assert_eq!(entry.unwrap(), dir.path().join("index.js"));
    }

    #[test]
    fn test_conventional_locations() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("dist/index.js"));
        touch(&dir.path().join("src/main.py"));

        // dist is searched before src
        let entry = resolve_entry_point(dir.path(), &manifest("x", None));
        assert_eq!(entry.unwrap(), dir.path().join("dist/index.js"));
    }

    #[test]
    fn test_plugin_name_stem_preferred() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("index.js"));
        touch(&dir.path().join("code-runner.py"));

        let entry = resolve_entry_point(dir.path(), &manifest("code-runner-1.0.0", None));
        assert_eq!(entry.unwrap(), dir.path().join("code-runner.py"));
    }

    #[test]
    fn test_scan_fallback() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("app/server/start.js"));
        touch(&dir.path().join("app/main.js"));
        touch(&dir.path().join("node_modules/pkg/index.js"));

        let entry = resolve_entry_point(dir.path(), &manifest("x", None));
        assert_eq!(entry.unwrap(), dir.path().join("app/main.js"));
    }

    #[test]
    fn test_no_entry_point() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("README.md"));
        touch(&dir.path().join("node_modules/pkg/index.js"));
        assert!(resolve_entry_point(dir.path(), &manifest("x", None)).is_none());
    }

    #[test]
    fn test_interpreter_for() {
        assert_eq!(interpreter_for(Path::new("a/index.js")), Some("node"));
        assert_eq!(interpreter_for(Path::new("a/index.mjs")), Some("node"));
        assert_eq!(interpreter_for(Path::new("main.py")), Some("python3"));
        assert_eq!(interpreter_for(Path::new("run.sh")), Some("sh"));
        assert_eq!(interpreter_for(Path::new("bin/plugin")), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_once_and_stop() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("plugin.sh");
        std::fs::write(&script, "exec sleep 30\n").unwrap();

        let table = ProcessTable::new();
        assert!(table.spawn("sleeper-1.0.0", &script, dir.path(), 9).unwrap());
        assert!(!table.spawn("sleeper", &script, dir.path(), 9).unwrap());
        assert!(table.is_running("sleeper"));
        assert!(table.pid("sleeper").is_some());

        assert!(table.stop("sleeper").await);
        assert!(!table.is_running("sleeper"));
        assert!(!table.stop("sleeper").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exited_process_leaves_table() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("plugin.sh");
        std::fs::write(&script, "echo \"started with $1\"\n").unwrap();

        let table = ProcessTable::new();
        table.spawn("quick", &script, dir.path(), 4242).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while table.is_running("quick") && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!table.is_running("quick"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_output_keeps_process_alive() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("plugin.sh");
        std::fs::write(
            &script,
            "printf '\\377\\n'\nprintf '\\376\\375' >&2\necho >&2\nsleep 0.3\necho still-here\nexec sleep 30\n",
        )
        .unwrap();

        let table = ProcessTable::new();
        table.spawn("noisy", &script, dir.path(), 1).unwrap();

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(table.is_running("noisy"));
        assert!(table.stop("noisy").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_notifier_reports_only_natural_exits() {
        let dir = TempDir::new().unwrap();
        let quick = dir.path().join("quick.sh");
        std::fs::write(&quick, "exit 1\n").unwrap();
        let slow = dir.path().join("slow.sh");
        std::fs::write(&slow, "exec sleep 30\n").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let table = ProcessTable::with_exit_notifier(tx);
        table.spawn("slow", &slow, dir.path(), 1).unwrap();
        table.spawn("quick-1.0.0", &quick, dir.path(), 1).unwrap();

        let exited = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(exited.as_deref(), Some("quick"));

        assert!(table.stop("slow").await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_spawn_missing_interpreter_target() {
        let dir = TempDir::new().unwrap();
        let table = ProcessTable::new();
        let err = table
            .spawn("ghost", &dir.path().join("no-such-binary"), dir.path(), 1)
            .unwrap_err();
        assert!(matches!(err, AppError::NotStartable(_)));
        assert!(!table.is_running("ghost"));
    }
}

//! Installer Integration Tests
//!
//! Installs packages from a directory-backed registry of zip archives.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use inkpad_desktop::services::plugins::{
    LocalPackageRegistry, MenuRegistry, PluginInstaller, PluginManager,
};
use inkpad_desktop::AppConfig;

// ============================================================================
// Helper Functions
// ============================================================================

fn config() -> AppConfig {
    AppConfig {
        plugin_port: 0,
        handshake_timeout_ms: 100,
        download_attempts: 2,
        download_backoff_ms: 1,
        ..Default::default()
    }
}

fn installer(root: &TempDir) -> PluginInstaller {
    let registry_dir = root.path().join("registry");
    std::fs::create_dir_all(&registry_dir).unwrap();
    PluginInstaller::new(
        root.path().join("plugins"),
        Arc::new(LocalPackageRegistry::new(registry_dir)),
        &config(),
    )
    .unwrap()
}

/// Write a zip archive into the registry directory.
fn publish(root: &TempDir, file: &str, files: &[(&str, &str)]) {
    let out = std::fs::File::create(root.path().join("registry").join(file)).unwrap();
    let mut zip = zip::ZipWriter::new(out);
    for (name, content) in files {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// Visible package directories under the plugins root.
fn package_dirs(plugins_dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(plugins_dir)
        .unwrap()
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_installs_leave_one_package() {
    let root = TempDir::new().unwrap();
    let installer = Arc::new(installer(&root));
    publish(
        &root,
        "code-runner-1.0.0.zip",
        &[
            ("plugin.json", r#"{"name": "code-runner", "version": "1.0.0"}"#),
            ("index.js", "console.log('hi')"),
        ],
    );

    let first = Arc::clone(&installer);
    let second = Arc::clone(&installer);
    let (a, b) = tokio::join!(
        async move { first.install("code-runner").await },
        async move { second.install("code-runner").await },
    );

    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.dir, b.dir);
    assert_eq!(package_dirs(installer.plugins_dir()), vec!["code-runner-1.0.0"]);
    assert!(installer.is_installed("code-runner-1.0.0"));
}

#[tokio::test]
async fn test_nested_package_root_is_hoisted() {
    let root = TempDir::new().unwrap();
    let installer = installer(&root);
    publish(
        &root,
        "word-count.zip",
        &[
            ("word-count/package.json", r#"{"name": "word-count", "version": "0.3.0", "main": "dist/main.js"}"#),
            ("word-count/dist/main.js", "//"),
        ],
    );

    let installed = installer.install("word-count").await.unwrap();

    assert_eq!(package_dirs(installer.plugins_dir()), vec!["word-count-0.3.0"]);
    assert!(installed.dir.join("package.json").is_file());
    assert!(installed.dir.join("dist").join("main.js").is_file());
    assert_eq!(installed.manifest.main.as_deref(), Some("dist/main.js"));
}

#[tokio::test]
async fn test_missing_manifest_gets_placeholder() {
    let root = TempDir::new().unwrap();
    let installer = installer(&root);
    publish(&root, "bare-2.1.0.zip", &[("plugin.json", "{}"), ("index.js", "//")]);

    let installed = installer.install("bare").await.unwrap();
    assert_eq!(installed.manifest.name, "bare");
    assert!(installer.is_installed("bare"));
}

#[tokio::test]
async fn test_manager_install_then_uninstall_twice() {
    let root = TempDir::new().unwrap();
    let installer = Arc::new(installer(&root));
    publish(
        &root,
        "autosave-1.0.0.zip",
        &[("plugin.json", r#"{"name": "autosave", "version": "1.0.0"}"#)],
    );
    let manager = PluginManager::new(config(), Arc::clone(&installer), Arc::new(MenuRegistry::new()));
    manager.start().await.unwrap();

    let available = manager.get_available_plugins().await.unwrap();
    assert_eq!(available.len(), 1);
    assert!(!available[0].installed);

    // No entry point, so the plugin installs but does not start
    let info = manager.install_plugin("autosave").await.unwrap();
    assert_eq!(info.name, "autosave");
    assert!(info.installed);
    assert!(manager.is_plugin_installed("autosave-1.0.0"));
    assert!(manager.get_available_plugins().await.unwrap()[0].installed);

    assert!(manager.uninstall_plugin("autosave").await);
    assert!(!manager.is_plugin_installed("autosave"));
    assert!(package_dirs(installer.plugins_dir()).is_empty());
    assert!(!installer.ledger().contains("autosave"));

    assert!(manager.uninstall_plugin("autosave").await);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_unknown_package_is_reported() {
    let root = TempDir::new().unwrap();
    let installer = Arc::new(installer(&root));
    let manager = PluginManager::new(config(), installer, Arc::new(MenuRegistry::new()));

    let err = manager.install_plugin("ghost").await.unwrap_err();
    assert_eq!(err.to_string(), "Not found: plugin 'ghost' in registry");
}

//! Plugin Installer
//!
//! Installs plugins from the package registry into `<pluginsRoot>/<dir>/` and
//! removes them again. Package directories are the source of truth for
//! "installed"; the extensions ledger is only kept in step.
//!
//! Install flow:
//! 1. Resolve the archive URL through the `PackageRegistry`
//! 2. Download with retry into a temp file next to the plugins root
//! 3. Extract into a hidden `.staging-<uuid>` directory and validate the manifest
//! 4. Rename staging to `<name>-<version>`
//! 5. Install allow-listed npm dependencies (best effort)
//! 6. Record the install in extensions.json

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use inkpad_core::{normalize_plugin_name, versioned_dir_name};

use crate::models::settings::AppConfig;
use crate::services::plugins::archive::{extract_zip, hoist_package_root, manifest_path};
use crate::services::plugins::download::{Downloader, RetryPolicy};
use crate::services::plugins::ledger::ExtensionsLedger;
use crate::services::plugins::models::{
    AvailablePlugin, InstalledPlugin, PluginManifest, UninstallReport,
};
use crate::services::plugins::registry::PackageRegistry;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{ensure_dir, ledger_path};

/// Upper bound for one `npm install` run.
const DEPENDENCY_INSTALL_TIMEOUT: Duration = Duration::from_secs(120);

const STAGING_PREFIX: &str = ".staging-";

/// Installs and removes plugin packages under one plugins root.
pub struct PluginInstaller {
    plugins_dir: PathBuf,
    ledger: ExtensionsLedger,
    registry: Arc<dyn PackageRegistry>,
    downloader: Downloader,
    dependency_allow_list: Vec<String>,
    /// One async lock per normalized plugin name
    install_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PluginInstaller {
    pub fn new(
        plugins_dir: impl Into<PathBuf>,
        registry: Arc<dyn PackageRegistry>,
        config: &AppConfig,
    ) -> AppResult<Self> {
        let plugins_dir = plugins_dir.into();
        Ok(Self {
            ledger: ExtensionsLedger::new(ledger_path(&plugins_dir)),
            plugins_dir,
            registry,
            downloader: Downloader::new(RetryPolicy::from_config(config))?,
            dependency_allow_list: config.dependency_allow_list.clone(),
            install_locks: DashMap::new(),
        })
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub fn ledger(&self) -> &ExtensionsLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<dyn PackageRegistry> {
        &self.registry
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Locate the package directory for `name`.
    ///
    /// Tries the exact directory, then the normalized one, then any directory
    /// whose name or manifest name normalizes to the same key.
    pub fn find_installed_dir(&self, name: &str) -> Option<PathBuf> {
        let exact = self.plugins_dir.join(name);
        if is_package_dir_name(name) && exact.is_dir() {
            return Some(exact);
        }

        let key = normalize_plugin_name(name);
        let normalized = self.plugins_dir.join(&key);
        if is_package_dir_name(&key) && normalized.is_dir() {
            return Some(normalized);
        }

        let dirs = self.package_dirs();
        if let Some(dir) = dirs.iter().find(|dir| dir_key(dir) == key) {
            return Some(dir.clone());
        }
        dirs.into_iter().find(|dir| {
            read_manifest_file(dir)
                .map(|manifest| manifest.key() == key)
                .unwrap_or(false)
        })
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.find_installed_dir(name).is_some()
    }

    /// Manifest of the installed package for `name`.
    pub fn read_manifest(&self, name: &str) -> AppResult<PluginManifest> {
        let dir = self
            .find_installed_dir(name)
            .ok_or_else(|| AppError::not_found(format!("plugin '{}' is not installed", name)))?;
        read_manifest_file(&dir)
    }

    pub fn load_installed(&self, name: &str) -> Option<InstalledPlugin> {
        let dir = self.find_installed_dir(name)?;
        let manifest = read_manifest_file(&dir).ok()?;
        Some(InstalledPlugin { manifest, dir })
    }

    /// Every package directory with a readable manifest.
    pub fn list_installed(&self) -> Vec<InstalledPlugin> {
        self.package_dirs()
            .into_iter()
            .filter_map(|dir| match read_manifest_file(&dir) {
                Ok(manifest) => Some(InstalledPlugin { manifest, dir }),
                Err(e) => {
                    debug!(dir = %dir.display(), "Skipping package without manifest: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Registry listing annotated with local install state.
    pub async fn list_available(&self) -> AppResult<Vec<AvailablePlugin>> {
        let entries = self.registry.list_available().await?;
        Ok(entries
            .into_iter()
            .map(|entry| AvailablePlugin {
                installed: self.is_installed(&entry.name),
                name: entry.name,
            })
            .collect())
    }

    /// Non-hidden directories directly under the plugins root, sorted.
    fn package_dirs(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.plugins_dir) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter(|path| {
                path.file_name()
                    .map(|n| is_package_dir_name(&n.to_string_lossy()))
                    .unwrap_or(false)
            })
            .collect();
        dirs.sort();
        dirs
    }

    fn install_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.install_locks
            .entry(normalize_plugin_name(name))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ========================================================================
    // Install
    // ========================================================================

    /// Install `name` from the registry.
    ///
    /// Installs of the same normalized name are serialized; the second caller
    /// finds the package already present and returns it without downloading.
    pub async fn install(&self, name: &str) -> AppResult<InstalledPlugin> {
        let lock = self.install_lock(name);
        let _guard = lock.lock().await;

        if let Some(dir) = self.find_installed_dir(name) {
            let manifest =
                read_manifest_file(&dir).unwrap_or_else(|_| PluginManifest::placeholder(name));
            info!(plugin = %name, dir = %dir.display(), "Plugin already installed");
            return Ok(InstalledPlugin { manifest, dir });
        }

        ensure_dir(&self.plugins_dir)?;
        let url = self.registry.download_url_by_name(name).await?;
        info!(plugin = %name, url = %url, "Installing plugin");

        let staging = self
            .plugins_dir
            .join(format!("{}{}", STAGING_PREFIX, uuid::Uuid::new_v4()));
        let result = self.install_from_url(name, &url, &staging).await;
        match tokio::fs::remove_dir_all(&staging).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(dir = %staging.display(), "Failed to clean up staging directory: {}", e);
            }
        }
        let installed = result?;

        self.install_dependencies(&installed).await;

        self.ledger.record_install(name);
        if installed.manifest.name != name && !installed.manifest.name.is_empty() {
            self.ledger.record_install(&installed.manifest.name);
        }

        info!(
            plugin = %installed.manifest.name,
            version = %installed.manifest.version,
            dir = %installed.dir.display(),
            "Plugin installed"
        );
        Ok(installed)
    }

    async fn install_from_url(
        &self,
        name: &str,
        url: &str,
        staging: &Path,
    ) -> AppResult<InstalledPlugin> {
        let archive = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".zip")
            .tempfile_in(&self.plugins_dir)?;
        self.downloader.download(url, archive.path()).await?;

        let archive_path = archive.path().to_path_buf();
        let staging_dir = staging.to_path_buf();
        tokio::task::spawn_blocking(move || {
            extract_zip(&archive_path, &staging_dir)?;
            hoist_package_root(&staging_dir)
        })
        .await
        .map_err(|e| AppError::internal(format!("Extraction task failed: {}", e)))??;

        let manifest = match read_manifest_file(staging) {
            Ok(manifest) if !manifest.name.trim().is_empty() => manifest,
            Ok(_) => {
                warn!(plugin = %name, "Manifest has no name, using requested name");
                PluginManifest::placeholder(name)
            }
            Err(e) => {
                warn!(plugin = %name, "Unreadable manifest, using requested name: {}", e);
                PluginManifest::placeholder(name)
            }
        };

        let dir_name = sanitize_dir_name(&versioned_dir_name(&manifest.name, &manifest.version))
            .ok_or_else(|| {
                AppError::install(format!("invalid plugin name '{}'", manifest.name))
            })?;
        let target = self.plugins_dir.join(&dir_name);

        if target.exists() {
            info!(plugin = %name, dir = %target.display(), "Target exists, reusing installation");
            let manifest = read_manifest_file(&target).unwrap_or(manifest);
            return Ok(InstalledPlugin {
                manifest,
                dir: target,
            });
        }

        tokio::fs::rename(staging, &target).await?;
        Ok(InstalledPlugin {
            manifest,
            dir: target,
        })
    }

    /// Run `npm install` for allow-listed dependencies. Never fails the install.
    async fn install_dependencies(&self, plugin: &InstalledPlugin) {
        let (allowed, skipped): (Vec<_>, Vec<_>) = plugin
            .manifest
            .dependencies
            .iter()
            .partition(|(dep, _)| self.dependency_allow_list.iter().any(|a| a == *dep));

        for (dep, _) in &skipped {
            warn!(plugin = %plugin.manifest.name, dependency = %dep, "Dependency not in allow list, skipping");
        }
        if allowed.is_empty() {
            return;
        }

        let specs: Vec<String> = allowed
            .iter()
            .map(|(dep, version)| {
                if version.trim().is_empty() {
                    dep.to_string()
                } else {
                    format!("{}@{}", dep, version)
                }
            })
            .collect();
        info!(plugin = %plugin.manifest.name, dependencies = ?specs, "Installing dependencies");

        let output = tokio::process::Command::new("npm")
            .args(["install", "--no-save", "--no-audit", "--no-fund"])
            .args(&specs)
            .current_dir(&plugin.dir)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(DEPENDENCY_INSTALL_TIMEOUT, output).await {
            Ok(Ok(out)) if out.status.success() => {
                info!(plugin = %plugin.manifest.name, "Dependencies installed");
            }
            Ok(Ok(out)) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                warn!(plugin = %plugin.manifest.name, "npm install failed: {}", stderr.trim());
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(plugin = %plugin.manifest.name, "npm is not installed, skipping dependencies");
            }
            Ok(Err(e)) => {
                warn!(plugin = %plugin.manifest.name, "Failed to run npm: {}", e);
            }
            Err(_) => {
                warn!(
                    plugin = %plugin.manifest.name,
                    "npm install timed out after {}s",
                    DEPENDENCY_INSTALL_TIMEOUT.as_secs()
                );
            }
        }
    }

    // ========================================================================
    // Uninstall
    // ========================================================================

    /// Remove every package directory belonging to `name`.
    ///
    /// Candidates are the exact and normalized directories plus any directory
    /// whose name or manifest normalizes to the same key. Removal failures are
    /// collected in the report; an absent plugin yields an empty report.
    pub async fn uninstall(&self, name: &str) -> AppResult<UninstallReport> {
        let lock = self.install_lock(name);
        let _guard = lock.lock().await;

        let key = normalize_plugin_name(name);
        let mut candidates = BTreeSet::new();
        for dir_name in [name, key.as_str()] {
            let dir = self.plugins_dir.join(dir_name);
            if is_package_dir_name(dir_name) && dir.is_dir() {
                candidates.insert(dir);
            }
        }
        for dir in self.package_dirs() {
            let matches = dir_key(&dir) == key
                || read_manifest_file(&dir)
                    .map(|manifest| manifest.key() == key)
                    .unwrap_or(false);
            if matches {
                candidates.insert(dir);
            }
        }

        // Install records the manifest name too when it differs from `name`
        let mut ledger_names = BTreeSet::from([name.to_string()]);
        let mut report = UninstallReport::default();
        for dir in candidates {
            if let Ok(manifest) = read_manifest_file(&dir) {
                if !manifest.name.is_empty() {
                    ledger_names.insert(manifest.name);
                }
            }
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    info!(plugin = %name, dir = %dir.display(), "Removed plugin directory");
                    report.removed.push(dir);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(plugin = %name, dir = %dir.display(), "Failed to remove plugin directory: {}", e);
                    report
                        .failures
                        .push(format!("remove {}: {}", dir.display(), e));
                }
            }
        }

        for ledger_name in &ledger_names {
            self.ledger.record_uninstall(ledger_name);
        }
        Ok(report)
    }
}

impl std::fmt::Debug for PluginInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstaller")
            .field("plugins_dir", &self.plugins_dir)
            .field("ledger", &self.ledger.path())
            .finish()
    }
}

/// Parse the manifest inside a package directory.
pub fn read_manifest_file(dir: &Path) -> AppResult<PluginManifest> {
    let path = manifest_path(dir).ok_or_else(|| {
        AppError::not_found(format!("no plugin manifest in {}", dir.display()))
    })?;
    let content = std::fs::read_to_string(&path)?;
    let manifest: PluginManifest = serde_json::from_str(&content)
        .map_err(|e| AppError::install(format!("invalid manifest {}: {}", path.display(), e)))?;
    Ok(manifest)
}

fn dir_key(dir: &Path) -> String {
    dir.file_name()
        .map(|n| normalize_plugin_name(&n.to_string_lossy()))
        .unwrap_or_default()
}

/// Directory names that may hold a package: no separators, not hidden.
fn is_package_dir_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\\')
}

/// Turn a manifest name into a single safe path component.
fn sanitize_dir_name(name: &str) -> Option<String> {
    let cleaned = name
        .trim()
        .trim_start_matches('@')
        .replace(['/', '\\'], "-");
    if is_package_dir_name(&cleaned) && cleaned != ".." {
        Some(cleaned)
    } else {
        None
    }
}

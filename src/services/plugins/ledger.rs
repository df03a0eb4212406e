//! Extensions Ledger
//!
//! Persists which plugins are installed to `<pluginsRoot>/../extensions.json`
//! so listings don't need a directory scan. The ledger is a write-through
//! cache only: package directories are the source of truth, and every
//! failure here is logged and swallowed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use inkpad_core::normalize_plugin_name;

use crate::services::plugins::models::LedgerEntry;
use crate::utils::error::AppResult;

/// Handle to an extensions.json file.
#[derive(Debug)]
pub struct ExtensionsLedger {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl ExtensionsLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all entries.
    ///
    /// Returns an empty ledger if the file doesn't exist or can't be parsed.
    pub fn load(&self) -> BTreeMap<String, LedgerEntry> {
        if !self.path.exists() {
            return BTreeMap::new();
        }

        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), "Ignoring unreadable ledger: {}", e);
                BTreeMap::new()
            }),
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to read ledger: {}", e);
                BTreeMap::new()
            }
        }
    }

    /// Whether the ledger lists `name` (exact or normalized).
    pub fn contains(&self, name: &str) -> bool {
        let ledger = self.load();
        ledger.contains_key(name) || ledger.contains_key(&normalize_plugin_name(name))
    }

    /// Record an install under the exact and the normalized name.
    pub fn record_install(&self, name: &str) {
        let now = chrono::Utc::now().timestamp_millis();
        self.update(|ledger| {
            for key in Self::keys(name) {
                ledger.insert(
                    key,
                    LedgerEntry {
                        enabled: true,
                        installed_timestamp: now,
                    },
                );
            }
        });
    }

    /// Remove the exact and the normalized name.
    pub fn record_uninstall(&self, name: &str) {
        self.update(|ledger| {
            for key in Self::keys(name) {
                ledger.remove(&key);
            }
        });
    }

    fn keys(name: &str) -> Vec<String> {
        let normalized = normalize_plugin_name(name);
        if normalized == name {
            vec![normalized]
        } else {
            vec![name.to_string(), normalized]
        }
    }

    fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut BTreeMap<String, LedgerEntry>),
    {
        let _guard = self.write_lock.lock();
        let mut ledger = self.load();
        mutate(&mut ledger);
        if let Err(e) = self.save(&ledger) {
            warn!(path = %self.path.display(), "Failed to write ledger: {}", e);
        }
    }

    fn save(&self, ledger: &BTreeMap<String, LedgerEntry>) -> AppResult<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(ledger)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

//! Plugin Data Models
//!
//! Host-side data types for the plugin system. Wire types (`PluginInfo`,
//! `MenuItem`, messages) live in `inkpad_core::protocol`; this module holds
//! what the host keeps about packages on disk and in the registry.
//!
//! ## Key Types
//!
//! - `PluginManifest` - parsed from plugin.json / package.json
//! - `InstalledPlugin` - a package directory together with its manifest
//! - `RegistryEntry` - one archive object listed by the package registry
//! - `AvailablePlugin` - registry entry annotated with local install state
//! - `PluginRunState` - whether a running plugin completed its handshake
//! - `LedgerEntry` - one record in extensions.json

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use inkpad_core::{normalize_plugin_name, PluginInfo};

/// Manifest file names, in lookup order.
pub const MANIFEST_FILES: &[&str] = &["plugin.json", "package.json"];

// ============================================================================
// Plugin Manifest
// ============================================================================

/// Plugin manifest parsed from plugin.json (or an npm-style package.json).
///
/// ```json
/// {
///   "name": "code-runner",
///   "version": "1.2.0",
///   "description": "Runs the current buffer",
///   "author": "inkpad",
///   "main": "dist/index.js",
///   "dependencies": { "axios": "^1.6.0" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Plugin name (unique identifier, kebab-case)
    pub name: String,
    /// Semantic version
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Accepts both `"author": "name"` and `"author": { "name": "...", "url": "..." }`
    #[serde(default, deserialize_with = "deserialize_author")]
    pub author: Option<String>,
    /// Entry point relative to the package root
    #[serde(default)]
    pub main: Option<String>,
    /// Third-party packages the plugin needs at runtime
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

/// Deserialize `author` from either a plain string or an object `{ "name": "...", ... }`.
fn deserialize_author<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Object(map)) => Ok(map
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())),
        Some(_) => Ok(None),
    }
}

impl Default for PluginManifest {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: "0.0.0".to_string(),
            description: String::new(),
            author: None,
            main: None,
            dependencies: BTreeMap::new(),
        }
    }
}

impl PluginManifest {
    /// Minimal manifest for a package whose manifest could not be read.
    pub fn placeholder(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: String::new(),
            ..Default::default()
        }
    }

    /// The logical identity of this plugin.
    pub fn key(&self) -> String {
        normalize_plugin_name(&self.name)
    }

    /// Protocol-level description of this package.
    pub fn to_info(&self, installed: bool) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            author: self.author.clone().unwrap_or_default(),
            installed,
        }
    }
}

// ============================================================================
// Installed Packages
// ============================================================================

/// A package directory under the plugins root.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledPlugin {
    pub manifest: PluginManifest,
    pub dir: PathBuf,
}

/// Outcome of a best-effort uninstall.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UninstallReport {
    /// Directories that were removed
    pub removed: Vec<PathBuf>,
    /// Steps that failed; logged, never surfaced to the UI
    pub failures: Vec<String>,
}

impl UninstallReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// One archive object in the package registry's flat namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Plugin name; derived from `ref` when the index omits it
    #[serde(default)]
    pub name: String,
    /// Object key used to build the download URL, e.g. `code-runner-1.2.0.zip`
    #[serde(rename = "ref")]
    pub reference: String,
}

impl RegistryEntry {
    pub fn new(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference: reference.into(),
        }
    }

    /// Fill in a missing name from the object key.
    pub fn with_derived_name(mut self) -> Self {
        if self.name.trim().is_empty() {
            let key = self.reference.rsplit('/').next().unwrap_or(&self.reference);
            self.name = key.strip_suffix(".zip").unwrap_or(key).to_string();
        }
        self
    }
}

/// Registry listing entry with local install state, for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailablePlugin {
    pub name: String,
    pub installed: bool,
}

// ============================================================================
// Runtime State
// ============================================================================

/// How the host knows a plugin is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginRunState {
    /// The plugin connected and sent `register-plugin`
    Registered,
    /// The handshake did not arrive in time; the entry was synthesized from
    /// the manifest and is upgraded when the real handshake shows up
    AssumedRunning,
}

impl std::fmt::Display for PluginRunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginRunState::Registered => write!(f, "registered"),
            PluginRunState::AssumedRunning => write!(f, "assumed-running"),
        }
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// One plugin record in extensions.json.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub enabled: bool,
    /// Milliseconds since the Unix epoch
    pub installed_timestamp: i64,
}

//! Package Registry
//!
//! Locates plugin archives. A registry exposes a flat namespace of archive
//! objects (`code-runner-1.2.0.zip`, ...) and turns an object reference into a
//! download URL.
//!
//! Two implementations ship with the host:
//! - `HttpPackageRegistry` reads a JSON index from a remote URL
//! - `LocalPackageRegistry` serves `.zip` files from a directory (offline
//!   mirrors, development)

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use inkpad_core::{normalize_plugin_name, split_versioned_name};

use crate::services::plugins::models::RegistryEntry;
use crate::utils::error::{AppError, AppResult};

/// Source of plugin archives.
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Every archive the registry offers.
    async fn list_available(&self) -> AppResult<Vec<RegistryEntry>>;

    /// Download URL for an object reference.
    async fn download_url(&self, reference: &str) -> AppResult<String>;

    /// Download URL for the best archive matching `name`.
    ///
    /// An exact name match wins; otherwise the highest version among entries
    /// with the same normalized name is chosen.
    async fn download_url_by_name(&self, name: &str) -> AppResult<String> {
        let entries = self.list_available().await?;
        let entry = select_entry(&entries, name)
            .ok_or_else(|| AppError::not_found(format!("plugin '{}' in registry", name)))?;
        debug!(plugin = %name, reference = %entry.reference, "Resolved registry entry");
        self.download_url(&entry.reference).await
    }
}

/// Pick the entry that best matches `name`.
pub fn select_entry<'a>(entries: &'a [RegistryEntry], name: &str) -> Option<&'a RegistryEntry> {
    if let Some(exact) = entries.iter().find(|e| e.name == name) {
        return Some(exact);
    }
    let key = normalize_plugin_name(name);
    entries
        .iter()
        .filter(|e| normalize_plugin_name(&e.name) == key)
        .max_by_key(|e| version_tuple(&e.name))
}

fn version_tuple(name: &str) -> (u64, u64, u64) {
    split_versioned_name(name)
        .map(|(_, version)| {
            let mut parts = version.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
            (
                parts.next().unwrap_or(0),
                parts.next().unwrap_or(0),
                parts.next().unwrap_or(0),
            )
        })
        .unwrap_or((0, 0, 0))
}

// ============================================================================
// HTTP Registry
// ============================================================================

/// Index document served by the registry URL. Both
/// `{ "plugins": [...] }` and a bare array are accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RegistryIndex {
    Wrapped { plugins: Vec<RegistryEntry> },
    Bare(Vec<RegistryEntry>),
}

impl RegistryIndex {
    fn into_entries(self) -> Vec<RegistryEntry> {
        match self {
            RegistryIndex::Wrapped { plugins } => plugins,
            RegistryIndex::Bare(plugins) => plugins,
        }
    }
}

/// Registry backed by a remote object store with a JSON index.
#[derive(Debug, Clone)]
pub struct HttpPackageRegistry {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpPackageRegistry {
    pub fn new(base_url: &str) -> AppResult<Self> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized)
            .map_err(|e| AppError::config(format!("Invalid registry URL '{}': {}", base_url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("inkpad-desktop")
            .build()
            .map_err(|e| AppError::registry(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl PackageRegistry for HttpPackageRegistry {
    async fn list_available(&self) -> AppResult<Vec<RegistryEntry>> {
        let response = self
            .client
            .get(self.base_url.clone())
            .send()
            .await
            .map_err(|e| AppError::registry(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::registry(format!(
                "HTTP {}: {}",
                response.status(),
                self.base_url
            )));
        }

        let index: RegistryIndex = response
            .json()
            .await
            .map_err(|e| AppError::registry(format!("Failed to parse registry index: {}", e)))?;

        let entries: Vec<RegistryEntry> = index
            .into_entries()
            .into_iter()
            .map(RegistryEntry::with_derived_name)
            .collect();
        info!("Fetched registry: {} plugins from {}", entries.len(), self.base_url);
        Ok(entries)
    }

    async fn download_url(&self, reference: &str) -> AppResult<String> {
        self.base_url
            .join(reference)
            .map(|url| url.to_string())
            .map_err(|e| AppError::registry(format!("Invalid object reference '{}': {}", reference, e)))
    }
}

// ============================================================================
// Local Registry
// ============================================================================

/// Registry backed by a directory of `.zip` archives.
#[derive(Debug, Clone)]
pub struct LocalPackageRegistry {
    root: PathBuf,
}

impl LocalPackageRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PackageRegistry for LocalPackageRegistry {
    async fn list_available(&self) -> AppResult<Vec<RegistryEntry>> {
        if !self.root.is_dir() {
            return Err(AppError::registry(format!(
                "Registry directory {} does not exist",
                self.root.display()
            )));
        }

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.root)?.flatten() {
            let path = entry.path();
            let is_zip = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("zip"))
                .unwrap_or(false);
            if !path.is_file() || !is_zip {
                continue;
            }
            let reference = entry.file_name().to_string_lossy().to_string();
            entries.push(RegistryEntry::new("", reference).with_derived_name());
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn download_url(&self, reference: &str) -> AppResult<String> {
        let path = self.root.join(reference);
        let absolute = std::path::absolute(&path)?;
        Url::from_file_path(&absolute)
            .map(|url| url.to_string())
            .map_err(|_| AppError::registry(format!("Invalid archive path {}", path.display())))
    }
}

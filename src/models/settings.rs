//! Settings Models
//!
//! Application configuration and settings data structures.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application configuration stored in config.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Loopback port plugins connect back to (0 picks a free port)
    pub plugin_port: u16,
    /// Plugins root directory; `~/.inkpad/plugins` when unset
    pub plugins_dir: Option<String>,
    /// Base URL of the remote package registry index
    pub registry_url: String,
    /// Budget for a single plugin execution
    pub execute_timeout_ms: u64,
    /// How long a freshly spawned plugin has to send `register-plugin`
    pub handshake_timeout_ms: u64,
    /// Download attempts before an install fails
    pub download_attempts: u32,
    /// Initial delay between download attempts, doubled after each failure
    pub download_backoff_ms: u64,
    /// Third-party packages plugins may pull in at install time
    pub dependency_allow_list: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            plugin_port: 9527,
            plugins_dir: None,
            registry_url: "https://plugins.inkpad.dev/registry/".to_string(),
            execute_timeout_ms: 30_000,
            handshake_timeout_ms: 5_000,
            download_attempts: 3,
            download_backoff_ms: 500,
            dependency_allow_list: vec![
                "axios".to_string(),
                "lodash".to_string(),
                "node-fetch".to_string(),
                "uuid".to_string(),
            ],
        }
    }
}

/// Settings update request (partial update)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SettingsUpdate {
    pub plugin_port: Option<u16>,
    pub plugins_dir: Option<String>,
    pub registry_url: Option<String>,
    pub execute_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub download_attempts: Option<u32>,
    pub download_backoff_ms: Option<u64>,
    pub dependency_allow_list: Option<Vec<String>>,
}

impl AppConfig {
    /// Apply a partial update to the configuration
    pub fn apply_update(&mut self, update: SettingsUpdate) {
        if let Some(port) = update.plugin_port {
            self.plugin_port = port;
        }
        if let Some(dir) = update.plugins_dir {
            self.plugins_dir = if dir.trim().is_empty() { None } else { Some(dir) };
        }
        if let Some(url) = update.registry_url {
            self.registry_url = url;
        }
        if let Some(ms) = update.execute_timeout_ms {
            self.execute_timeout_ms = ms;
        }
        if let Some(ms) = update.handshake_timeout_ms {
            self.handshake_timeout_ms = ms;
        }
        if let Some(attempts) = update.download_attempts {
            self.download_attempts = attempts;
        }
        if let Some(ms) = update.download_backoff_ms {
            self.download_backoff_ms = ms;
        }
        if let Some(list) = update.dependency_allow_list {
            self.dependency_allow_list = list;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.execute_timeout_ms == 0 {
            return Err("execute_timeout_ms must be greater than 0".to_string());
        }
        if self.handshake_timeout_ms == 0 {
            return Err("handshake_timeout_ms must be greater than 0".to_string());
        }
        if self.download_attempts == 0 {
            return Err("download_attempts must be at least 1".to_string());
        }
        if self.registry_url.trim().is_empty() {
            return Err("registry_url cannot be empty".to_string());
        }
        if let Err(e) = url::Url::parse(&self.registry_url) {
            return Err(format!("Invalid registry_url '{}': {}", self.registry_url, e));
        }
        Ok(())
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_millis(self.execute_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Explicit plugins directory, if one is configured.
    pub fn plugins_dir_override(&self) -> Option<PathBuf> {
        self.plugins_dir.as_ref().map(PathBuf::from)
    }
}

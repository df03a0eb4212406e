//! Application State
//!
//! Global state shared by every command: the configuration service and the
//! plugin host.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::commands::plugins::PluginState;
use crate::models::settings::{AppConfig, SettingsUpdate};
use crate::storage::ConfigService;
use crate::utils::error::{AppError, AppResult};

/// Application state shared by the UI commands
pub struct AppState {
    /// Configuration service for app settings
    config: Arc<RwLock<Option<ConfigService>>>,
    /// Plugin host
    plugins: PluginState,
    /// Whether the state has been initialized
    initialized: Arc<RwLock<bool>>,
}

impl AppState {
    /// Create a new uninitialized app state
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(None)),
            plugins: PluginState::new(),
            initialized: Arc::new(RwLock::new(false)),
        }
    }

    /// Initialize all services from `~/.inkpad/config.json`
    pub async fn initialize(&self) -> AppResult<()> {
        let config = ConfigService::new()?;
        self.initialize_with(config).await
    }

    /// Initialize all services from an already opened config service.
    ///
    /// Returns without doing anything when the state is already initialized.
    pub async fn initialize_with(&self, config: ConfigService) -> AppResult<()> {
        let mut initialized = self.initialized.write().await;
        if *initialized {
            return Ok(());
        }

        let plugins_dir = config.plugins_dir()?;
        let app_config = config.get_config_clone();
        {
            let mut config_lock = self.config.write().await;
            *config_lock = Some(config);
        }

        self.plugins.initialize(app_config, plugins_dir).await?;

        *initialized = true;
        Ok(())
    }

    /// Plugin host state
    pub fn plugins(&self) -> &PluginState {
        &self.plugins
    }

    /// Check if config is healthy
    pub fn is_config_healthy(&self) -> bool {
        if let Ok(guard) = self.config.try_read() {
            if let Some(ref config) = *guard {
                return config.is_healthy();
            }
        }
        false
    }

    /// Get the current configuration
    pub async fn get_config(&self) -> AppResult<AppConfig> {
        let guard = self.config.read().await;
        match &*guard {
            Some(config) => Ok(config.get_config_clone()),
            None => Err(AppError::config("Config service not initialized")),
        }
    }

    /// Update the configuration
    pub async fn update_config(&self, update: SettingsUpdate) -> AppResult<AppConfig> {
        let mut guard = self.config.write().await;
        match &mut *guard {
            Some(config) => config.update_config(update),
            None => Err(AppError::config("Config service not initialized")),
        }
    }

    /// Stop the plugin host
    pub async fn shutdown(&self) {
        self.plugins.shutdown().await;
        *self.initialized.write().await = false;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

//! Plugin Commands
//!
//! UI-facing entry points for the plugin host: listing, installing,
//! uninstalling and running plugins, and reading plugin menus. Every command
//! returns a `CommandResponse`, errors included.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use inkpad_core::{MenuItem, PluginInfo, PluginResponse};

use crate::models::response::{CommandResponse, ExecuteRequest};
use crate::models::settings::AppConfig;
use crate::services::plugins::installer::PluginInstaller;
use crate::services::plugins::manager::PluginManager;
use crate::services::plugins::menu::MenuRegistry;
use crate::services::plugins::models::AvailablePlugin;
use crate::services::plugins::registry::{HttpPackageRegistry, PackageRegistry};
use crate::utils::error::{AppError, AppResult};

// ============================================================================
// Plugin State
// ============================================================================

/// Holder of the running plugin manager.
///
/// Uses `Arc<RwLock<Option<PluginManager>>>` for lazy initialization.
#[derive(Clone, Default)]
pub struct PluginState {
    inner: Arc<RwLock<Option<PluginManager>>>,
}

impl PluginState {
    /// Create a new uninitialized plugin state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plugin manager against the remote registry and start it.
    pub async fn initialize(&self, config: AppConfig, plugins_dir: PathBuf) -> AppResult<u16> {
        let registry: Arc<dyn PackageRegistry> =
            Arc::new(HttpPackageRegistry::new(&config.registry_url)?);
        let installer = PluginInstaller::new(plugins_dir, registry, &config)?;
        let manager = PluginManager::new(config, Arc::new(installer), Arc::new(MenuRegistry::new()));
        self.initialize_with(manager).await
    }

    /// Start `manager` and make it the active plugin manager.
    pub async fn initialize_with(&self, manager: PluginManager) -> AppResult<u16> {
        let mut guard = self.inner.write().await;
        if guard.is_some() {
            return Err(AppError::internal("plugin system already initialized"));
        }
        let port = manager.start().await?;
        info!(port, "Plugin system initialized");
        *guard = Some(manager);
        Ok(port)
    }

    /// The active manager. Clones share state, so no lock is held while the
    /// caller awaits.
    pub async fn manager(&self) -> AppResult<PluginManager> {
        let guard = self.inner.read().await;
        guard
            .clone()
            .ok_or_else(|| AppError::internal("Plugin system not initialized"))
    }

    /// Shut the manager down and forget it.
    pub async fn shutdown(&self) {
        let manager = self.inner.write().await.take();
        if let Some(manager) = manager {
            manager.shutdown().await;
        }
    }
}

impl std::fmt::Debug for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginState").finish_non_exhaustive()
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Live plugins.
pub async fn list_plugins(state: &PluginState) -> CommandResponse<Vec<PluginInfo>> {
    match state.manager().await {
        Ok(manager) => CommandResponse::ok(manager.get_plugins()),
        Err(e) => CommandResponse::err(e.to_string()),
    }
}

/// Registry listing with install state.
pub async fn list_available_plugins(state: &PluginState) -> CommandResponse<Vec<AvailablePlugin>> {
    let result = match state.manager().await {
        Ok(manager) => manager.get_available_plugins().await,
        Err(e) => Err(e),
    };
    result.into()
}

pub async fn is_plugin_installed(state: &PluginState, name: String) -> CommandResponse<bool> {
    match state.manager().await {
        Ok(manager) => CommandResponse::ok(manager.is_plugin_installed(&name)),
        Err(e) => CommandResponse::err(e.to_string()),
    }
}

pub async fn install_plugin(state: &PluginState, name: String) -> CommandResponse<PluginInfo> {
    let result = match state.manager().await {
        Ok(manager) => manager.install_plugin(&name).await,
        Err(e) => Err(e),
    };
    result.into()
}

/// Always `true` once the plugin system is up.
pub async fn uninstall_plugin(state: &PluginState, name: String) -> CommandResponse<bool> {
    match state.manager().await {
        Ok(manager) => CommandResponse::ok(manager.uninstall_plugin(&name).await),
        Err(e) => CommandResponse::err(e.to_string()),
    }
}

pub async fn execute_plugin(
    state: &PluginState,
    request: ExecuteRequest,
) -> CommandResponse<PluginResponse> {
    let result = match state.manager().await {
        Ok(manager) => {
            manager
                .execute_plugin(
                    &request.plugin_name,
                    request.content,
                    request.file_path,
                    request.options,
                )
                .await
        }
        Err(e) => Err(e),
    };
    result.into()
}

pub async fn get_menu_items(state: &PluginState, parent_menu: String) -> CommandResponse<Vec<MenuItem>> {
    match state.manager().await {
        Ok(manager) => CommandResponse::ok(manager.get_menu_items_for_parent(&parent_menu)),
        Err(e) => CommandResponse::err(e.to_string()),
    }
}

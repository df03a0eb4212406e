//! Inkpad Desktop - Plugin Host Library
//!
//! This library provides the plugin host of the Inkpad desktop editor.
//! It includes:
//! - Command handlers called by the editor UI
//! - The plugin manager, installer and menu registry
//! - Storage layer (JSON config)
//! - Data models and utilities
//!
//! The wire protocol shared with plugins lives in `inkpad-core`.

pub mod commands;
pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;

// Re-export commonly used items from commands
pub use commands::{
    // Settings commands
    get_settings, update_settings,
    // Plugin commands
    execute_plugin, get_menu_items, install_plugin, is_plugin_installed, list_available_plugins,
    list_plugins, uninstall_plugin, PluginState,
};
// Re-export models (avoiding settings module conflict)
pub use models::response::*;
pub use models::settings::{AppConfig, SettingsUpdate};
pub use state::AppState;
pub use utils::error::{AppError, AppResult};

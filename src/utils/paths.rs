//! Cross-Platform Path Utilities
//!
//! Functions for resolving application directories across platforms.
//! Handles ~/.inkpad/, ~/.inkpad/plugins/, and the extensions ledger.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the Inkpad directory (~/.inkpad/)
pub fn inkpad_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".inkpad"))
}

/// Get the config file path (~/.inkpad/config.json)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(inkpad_dir()?.join("config.json"))
}

/// Get the default plugins root (~/.inkpad/plugins/)
pub fn default_plugins_dir() -> AppResult<PathBuf> {
    Ok(inkpad_dir()?.join("plugins"))
}

/// Ledger file for a plugins root: `<pluginsRoot>/../extensions.json`
pub fn ledger_path(plugins_root: &Path) -> PathBuf {
    match plugins_root.parent() {
        Some(parent) => parent.join("extensions.json"),
        None => plugins_root.join("extensions.json"),
    }
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Get the Inkpad directory, creating if it doesn't exist
pub fn ensure_inkpad_dir() -> AppResult<PathBuf> {
    let path = inkpad_dir()?;
    ensure_dir(&path)?;
    Ok(path)
}

//! Plugin Name Normalization
//!
//! Plugins are often published and registered under a versioned name such as
//! `autosave-1.0.0`. The logical identity of a plugin is that name with the
//! trailing `-MAJOR.MINOR.PATCH` suffix removed.

use std::sync::OnceLock;

use regex::Regex;

fn version_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+)-(\d+\.\d+\.\d+)$").expect("static regex is valid"))
}

/// Strip a trailing `-MAJOR.MINOR.PATCH` suffix from a plugin name.
///
/// Names without such a suffix are returned unchanged.
pub fn normalize_plugin_name(name: &str) -> String {
    let trimmed = name.trim();
    match version_suffix().captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

/// Split a versioned name into `(base, version)`.
pub fn split_versioned_name(name: &str) -> Option<(String, String)> {
    version_suffix()
        .captures(name.trim())
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

/// Whether two names refer to the same logical plugin.
pub fn same_plugin(a: &str, b: &str) -> bool {
    normalize_plugin_name(a) == normalize_plugin_name(b)
}

/// Directory name used for an installed package: `<name>-<version>`,
/// or just the name when no version is declared.
pub fn versioned_dir_name(name: &str, version: &str) -> String {
    let base = normalize_plugin_name(name);
    let version = version.trim();
    if version.is_empty() {
        base
    } else {
        format!("{}-{}", base, version)
    }
}

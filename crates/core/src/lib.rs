//! Inkpad Core
//!
//! Protocol types and error types shared by the Inkpad Desktop plugin host
//! and by plugin SDKs. This crate has no dependency on the host's runtime
//! stack (tokio, HTTP, process management).
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `protocol` - Tagged plugin messages and their payloads
//! - `framing` - Reassembly of JSON documents from a byte stream
//! - `naming` - Plugin name normalization (`autosave-1.0.0` -> `autosave`)

pub mod error;
pub mod framing;
pub mod naming;
pub mod protocol;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Protocol ───────────────────────────────────────────────────────────
pub use framing::MessageBuffer;
pub use naming::{normalize_plugin_name, same_plugin, split_versioned_name, versioned_dir_name};
pub use protocol::{
    Envelope, ExecutePayload, MenuActionPayload, MenuItem, PluginInfo, PluginMessage,
    PluginResponse, RegisterMenuPayload,
};

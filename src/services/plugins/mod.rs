//! Plugin Host
//!
//! Hosts editor plugins that run as separate processes and talk to the
//! editor over a loopback socket. Each message is one JSON document written
//! without a delimiter; `inkpad_core::MessageBuffer` recovers the boundaries.
//!
//! Architecture:
//! - models.rs:      Data types (PluginManifest, InstalledPlugin, RegistryEntry, etc.)
//! - subscribers.rs: Listener lists for change notifications
//! - menu.rs:        Menu items contributed by plugins
//! - connection.rs:  One plugin socket with request/response correlation
//! - registry.rs:    Remote and local package indexes
//! - download.rs:    Archive downloads with retry and backoff
//! - archive.rs:     Zip extraction and package root detection
//! - ledger.rs:      Record of installed extensions
//! - installer.rs:   Install, uninstall and discovery on disk
//! - process.rs:     Plugin process spawning and supervision
//! - manager.rs:     Unified entry point for plugin management

pub mod archive;
pub mod connection;
pub mod download;
pub mod installer;
pub mod ledger;
pub mod manager;
pub mod menu;
pub mod models;
pub mod process;
pub mod registry;
pub mod subscribers;

pub use connection::PluginConnection;
pub use installer::PluginInstaller;
pub use manager::PluginManager;
pub use menu::MenuRegistry;
pub use models::*;
pub use registry::{HttpPackageRegistry, LocalPackageRegistry, PackageRegistry};
pub use subscribers::ListenerId;

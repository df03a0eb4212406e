//! Storage Layer
//!
//! Handles the JSON configuration file.

pub mod config;

pub use config::*;

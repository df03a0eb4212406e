//! Commands
//!
//! Entry points called by the editor UI. Every command returns a
//! `CommandResponse` so failures reach the UI as data.

pub mod plugins;
pub mod settings;

pub use plugins::*;
pub use settings::*;

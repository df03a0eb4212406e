//! Core Error Types
//!
//! Defines the foundational error types used across the Inkpad workspace.
//! These error types only depend on thiserror + serde_json so that plugin SDKs
//! can share them without pulling in the host's runtime stack.
//!
//! The host crate extends these with transport, install and execution
//! variants that require heavier dependencies.

use thiserror::Error;

/// Core error type for the Inkpad workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A message that is valid JSON but not a valid protocol message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Bytes on the wire that are not JSON at all
    #[error("Parse error: {0}")]
    Parse(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Convert CoreError to a string
impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}

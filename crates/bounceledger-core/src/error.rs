//! Error types for the core library.
//!
//! Analysis itself never fails: analyzer errors are isolated by the
//! pipeline. These errors come from loading configuration.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

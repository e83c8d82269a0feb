//! Process-level error type shared by binaries and configuration loading.

use std::fmt;

/// A specialized Result type for process-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for binaries built on the VRRP library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("VRRP error: {0}")]
    Vrrp(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new VRRP error.
    pub fn vrrp(msg: impl fmt::Display) -> Self {
        Error::Vrrp(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}

//! Common error types for blocksync.

use thiserror::Error;

/// Top-level error type for blocksync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local or remote store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote backend could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted (missing session, rules rejected the write).
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote sync is not configured.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Whether retrying the same call might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

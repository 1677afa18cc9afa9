//! Error types for the sync layer.

use thiserror::Error;

/// Failure reported by a remote store call.
///
/// Every variant is treated as transient by the sync layer: callers fall
/// through to the next tier instead of surfacing it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Remote call timed out")]
    Timeout,

    #[error("Remote document not found: {0}")]
    NotFound(String),

    #[error("Malformed remote payload: {0}")]
    Malformed(String),
}

/// Main error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Local storage error: {0}")]
    Storage(String),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Every write tier failed, last error: {0}")]
    TiersExhausted(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

//! Error types for the synchronization core.

use thiserror::Error;

/// Errors raised by a [`KeyValueStore`](crate::KeyValueStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced to callers of the session, cache, and thread operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Caller-supplied input is malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing, invalid, or expired credential.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network unreachable or timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote returned a failure status.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Resource does not exist remotely.
    #[error("not found: {0}")]
    NotFound(String),

    /// Remote returned a success status with a body we could not decode.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Persistent store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether a refresh failing with this error may fall back to cached data.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::Server { .. } | SyncError::InvalidResponse(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::InvalidResponse(err.to_string())
        } else {
            // Timeouts, refused connections and malformed requests all mean
            // the call never produced a usable response.
            SyncError::Transport(err.to_string())
        }
    }
}

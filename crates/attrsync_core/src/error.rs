//! Error types for attrsync core.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during synchronization and delivery.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server rejected the request.
    ///
    /// Rejections are permanent: retrying a request the server has refused
    /// only amplifies load, so the delivery vault discards these.
    #[error("server rejected request with status {status}")]
    Rejected {
        /// HTTP-style status code returned by the server.
        status: u16,
    },

    /// Store error while persisting or restoring state.
    #[error("store error: {0}")]
    Store(#[from] attrsync_store::StoreError),

    /// A persisted or wire blob could not be serialized or parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The delivery queue is at capacity.
    #[error("delivery queue is full")]
    QueueFull,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error is transient and the operation can be
    /// retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

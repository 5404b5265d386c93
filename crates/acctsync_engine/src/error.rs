//! Error types for the sync engine.

use acctsync_protocol::SequenceState;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server reports that another session with the same auth key is
    /// already fetching the difference.
    #[error("difference requested by a duplicate session")]
    DuplicateSession,

    /// The gap since the persisted state cannot be served as a difference.
    #[error("difference too long (server pts {pts})")]
    DifferenceTooLong {
        /// Server pts reported with the response.
        pts: i32,
    },

    /// Persisted sequencing state changed under an in-flight operation.
    #[error("sequencing state mismatch: expected {expected:?}, found {found:?}")]
    StateMismatch {
        /// State the operation was prepared against.
        expected: SequenceState,
        /// State found in storage.
        found: Option<SequenceState>,
    },

    /// Storage failure during replay or lookup.
    #[error("storage error: {0}")]
    Storage(String),

    /// The engine worker is gone.
    #[error("engine channel closed")]
    ChannelClosed,

    /// Custom work panicked or was aborted.
    #[error("custom operation failed: {0}")]
    Custom(String),
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

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::StateMismatch { .. } => true,
            _ => false,
        }
    }

    /// Returns true if the engine cannot recover from this error on its own.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::DifferenceTooLong { .. })
    }
}

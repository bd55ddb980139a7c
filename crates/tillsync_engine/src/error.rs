//! Error types for the replication engine.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur during replication.
///
/// `Clone` is required so that a settled deduplicated fetch can fan its
/// outcome out to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Network or transport error from the REST collaborator.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the next cycle is expected to succeed.
        retryable: bool,
    },

    /// The server or REST collaborator violated the wire contract, e.g.
    /// a remote-ID listing that is not an array of numeric ids.
    #[error("invalid response: {0}")]
    Validation(String),

    /// Local store (collection, ledger or side-record) failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The replication instance was canceled.
    #[error("replication canceled")]
    Cancelled,
}

impl EngineError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Returns true if the next scheduled cycle may succeed without
    /// intervention. Validation errors are contract violations and are
    /// never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Network { retryable, .. } => *retryable,
            EngineError::Validation(_) => false,
            EngineError::Storage(_) => false,
            EngineError::Cancelled => false,
        }
    }
}

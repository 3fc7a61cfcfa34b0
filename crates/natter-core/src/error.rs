//! Error types for delivery core operations.

use thiserror::Error;

/// Result type for delivery core operations.
pub type Result<T> = std::result::Result<T, NatterError>;

/// Errors that can occur inside the delivery core.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum NatterError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("directory error: {0}")]
    Directory(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NatterError {
    /// True when the error means the peer is unreachable and the
    /// connection should be pruned from the registry.
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, NatterError::ConnectionClosed)
    }

    /// True when the error came from a collaborator; delivery proceeds
    /// and the failure is only logged.
    #[inline]
    #[must_use]
    pub fn is_collaborator(&self) -> bool {
        matches!(
            self,
            NatterError::Repository(_) | NatterError::Directory(_)
        )
    }
}

//! Common error types for intake

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common result type for intake operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the hub and desk sessions
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested submission (or other resource) not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Status value outside the lifecycle enum
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Malformed tag, priority, assignee or empty change
    #[error("Validation error: {0}")]
    Validation(String),

    /// Per-id critical section could not be entered in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Event stream dropped; recover with a full re-fetch
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Serializable classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidTransition(_) => ErrorKind::InvalidTransition,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::ConnectionLost(_) => ErrorKind::ConnectionLost,
            Error::Database(_) | Error::Io(_) | Error::Config(_) | Error::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Rebuild an error from its wire classification
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::NotFound => Error::NotFound(message),
            ErrorKind::InvalidTransition => Error::InvalidTransition(message),
            ErrorKind::Validation => Error::Validation(message),
            ErrorKind::Timeout => Error::Timeout(message),
            ErrorKind::ConnectionLost => Error::ConnectionLost(message),
            ErrorKind::Internal => Error::Internal(message),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("JSON error: {}", e))
    }
}

/// Error classification carried over the wire (bulk reports, API bodies)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    Validation,
    Timeout,
    ConnectionLost,
    Internal,
}

impl ErrorKind {
    /// Whether retrying the whole operation is safe and may succeed
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::ConnectionLost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip_preserves_classification() {
        let err = Error::Timeout("submission 42".to_string());
        let kind = err.kind();
        assert_eq!(kind, ErrorKind::Timeout);
        assert!(matches!(Error::from_kind(kind, "x"), Error::Timeout(_)));
    }

    #[test]
    fn test_only_timeouts_and_dropped_connections_retry() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::ConnectionLost.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::InvalidTransition.is_retryable());
    }

    #[test]
    fn test_infrastructure_errors_classify_as_internal() {
        let err = Error::Config("bad".to_string());
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}

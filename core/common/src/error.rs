//! Common error types for docsync.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for docsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote object or resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stale revision marker on a write or delete.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The remote tree listing was truncated by the backend.
    #[error("Git tree too big: {0}")]
    TreeTooLarge(String),

    /// The authenticated account is not the one that was expected.
    #[error("Account ID not expected: expected {expected}, got {actual}")]
    IdentityMismatch { expected: String, actual: String },

    /// Transient identity resolution failure, the caller may retry.
    #[error("Retryable: {0}")]
    Retryable(String),

    /// The identity cannot be resolved, the caller should stop retrying.
    #[error("Permanently unresolvable: {0}")]
    PermanentlyUnresolvable(String),

    /// Structured HTTP failure that no other variant classifies.
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    /// Transport could not complete the exchange.
    #[error("Network error: {0}")]
    Network(String),

    /// Connection failed before any part of the request was sent.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Credentials were rejected or the OAuth2 exchange failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Access to the resource was denied.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

/// Coarse classification of an [`Error`], used for per-item reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    TreeTooLarge,
    IdentityMismatch,
    Retryable,
    PermanentlyUnresolvable,
    Http,
    Network,
    Authentication,
    PermissionDenied,
    Io,
    Serialization,
    InvalidInput,
    AlreadyExists,
}

impl Error {
    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::TreeTooLarge(_) => ErrorKind::TreeTooLarge,
            Error::IdentityMismatch { .. } => ErrorKind::IdentityMismatch,
            Error::Retryable(_) => ErrorKind::Retryable,
            Error::PermanentlyUnresolvable(_) => ErrorKind::PermanentlyUnresolvable,
            Error::Http { .. } => ErrorKind::Http,
            Error::Network(_) | Error::Connect(_) => ErrorKind::Network,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
        }
    }

    /// HTTP status carried by this error, if it came from a structured response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::NotFound(_) => Some(404),
            Error::Conflict(_) => Some(409),
            Error::Authentication(_) => Some(401),
            Error::PermissionDenied(_) => Some(403),
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error ends the current sync cycle instead of a single item.
    pub fn is_fatal_for_cycle(&self) -> bool {
        matches!(self, Error::TreeTooLarge(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_status() {
        let err = Error::Conflict("note/001.md".to_string());
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.status(), Some(409));

        let err = Error::Network("connection reset".to_string());
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.status(), None);

        let err = Error::Connect("connection refused".to_string());
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[test]
    fn test_fatal_for_cycle() {
        assert!(Error::TreeTooLarge("repo".to_string()).is_fatal_for_cycle());
        assert!(!Error::NotFound("a.md".to_string()).is_fatal_for_cycle());
        assert!(!Error::Conflict("a.md".to_string()).is_fatal_for_cycle());
    }

    #[test]
    fn test_identity_mismatch_message() {
        let err = Error::IdentityMismatch {
            expected: "42".to_string(),
            actual: "7".to_string(),
        };
        assert!(err.to_string().contains("expected 42"));
    }
}

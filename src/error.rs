//! Error types for the user pool operator.
//!
//! This module provides the error hierarchy for every stage of a
//! reconciliation pass: configuration, the declarative store, the identity
//! backend, and the reconciler itself.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the operator.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Declarative store errors.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Identity backend errors.
    #[error("Identity backend error: {0}")]
    Backend(#[from] BackendError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

}

/// Declarative store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The resource does not exist in the store.
    #[error("User resource not found: {key}")]
    NotFound {
        /// Key of the missing resource.
        key: String,
    },

    /// The store contents are corrupted.
    #[error("Store is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Reading or writing the backing file failed.
    #[error("Store write failed: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// Serialization error.
    #[error("Store serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Classification of identity backend failures.
///
/// The reconciler decides what is an idempotent success and what must be
/// surfaced purely from this kind, never from provider-specific details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request is malformed; retrying cannot help.
    InvalidArgument,
    /// The user does not exist in the pool.
    NotFound,
    /// A user with the same username already exists.
    AlreadyExists,
    /// Network or provider-side transient failure.
    Unavailable,
    /// Any other failure.
    Unknown,
}

/// An identity backend failure.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Provider message.
    pub message: String,
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The desired record is malformed.
    #[error("Invalid user '{name}': {reason}")]
    InvalidUser {
        /// Name of the user.
        name: String,
        /// Why the record was rejected.
        reason: String,
    },

    /// An operation failed part-way through a pass.
    #[error("Operation {operation} failed for '{name}' after {completed} completed: {source}")]
    OperationFailed {
        /// Name of the user.
        name: String,
        /// Operation that failed.
        operation: String,
        /// Number of operations applied before the failure.
        completed: usize,
        /// Underlying backend failure.
        #[source]
        source: BackendError,
    },

    /// The pass was cancelled before completion.
    #[error("Reconciliation of '{key}' cancelled")]
    Cancelled {
        /// Resource key of the cancelled pass.
        key: String,
    },

}

/// Result type alias for operator operations.
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the backend failure classification, if this error has one.
    #[must_use]
    pub const fn backend_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Backend(e) => Some(e.kind),
            Self::Reconcile(ReconcileError::OperationFailed { source, .. }) => Some(source.kind),
            Self::Reconcile(ReconcileError::InvalidUser { .. }) => Some(ErrorKind::InvalidArgument),
            _ => None,
        }
    }

    /// Returns true if retrying the same pass later can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self.backend_kind() {
            Some(kind) => kind.is_retryable(),
            None => matches!(self, Self::Store(_) | Self::Io(_)),
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self.backend_kind() {
            Some(ErrorKind::Unavailable) => Some(5),
            Some(ErrorKind::Unknown | ErrorKind::NotFound | ErrorKind::AlreadyExists) => Some(10),
            Some(ErrorKind::InvalidArgument) => None,
            None => match self {
                Self::Store(_) | Self::Io(_) => Some(2),
                _ => None,
            },
        }
    }

    /// Returns true if this error is a cancellation rather than a failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Reconcile(ReconcileError::Cancelled { .. }))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StoreError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

impl ErrorKind {
    /// Returns true if the driver should retry after this failure.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::InvalidArgument)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidArgument => "invalid argument",
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::Unavailable => "unavailable",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl BackendError {
    /// Creates a backend error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Creates a not-found error for a username.
    #[must_use]
    pub fn not_found(username: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("user {username} does not exist"))
    }

    /// Creates an already-exists error for a username.
    #[must_use]
    pub fn already_exists(username: &str) -> Self {
        Self::new(ErrorKind::AlreadyExists, format!("user {username} already exists"))
    }

    /// Creates a transient-failure error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// Creates an unclassified error.
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Returns true if this error is a `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    /// Returns true if this error is an `AlreadyExists`.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        self.kind == ErrorKind::AlreadyExists
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_not_retryable() {
        let err = OperatorError::Backend(BackendError::invalid_argument("empty name"));
        assert!(!err.is_retryable());
        assert_eq!(err.retry_delay_secs(), None);
    }

    #[test]
    fn test_operation_failure_inherits_kind() {
        let err = OperatorError::Reconcile(ReconcileError::OperationFailed {
            name: String::from("alice"),
            operation: String::from("create"),
            completed: 0,
            source: BackendError::unavailable("throttled"),
        });
        assert_eq!(err.backend_kind(), Some(ErrorKind::Unavailable));
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), Some(5));
    }

    #[test]
    fn test_cancelled_is_not_a_backend_failure() {
        let err = OperatorError::Reconcile(ReconcileError::Cancelled {
            key: String::from("default/alice"),
        });
        assert!(err.is_cancelled());
        assert_eq!(err.backend_kind(), None);
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::not_found("bob");
        assert_eq!(err.to_string(), "not found: user bob does not exist");
    }
}

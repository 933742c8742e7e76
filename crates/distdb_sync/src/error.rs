//! Error types for the sync scheduler.

use distdb_codec::CodecError;
use distdb_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can end a sync attempt.
///
/// Cloneable: one terminal result is delivered to every merged callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The request itself is malformed.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong.
        message: String,
    },

    /// The store is locked by another operation.
    #[error("store busy: {message}")]
    Busy {
        /// What was busy.
        message: String,
    },

    /// The peer or cloud could not be reached.
    #[error("network error: {message}")]
    Network {
        /// Transport detail.
        message: String,
    },

    /// The caller may not sync this store.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Denial reason.
        message: String,
    },

    /// Local and remote schemas cannot be reconciled.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// Mismatch detail.
        message: String,
    },

    /// Received rows are malformed.
    #[error("parse failure: {message}")]
    ParseFailure {
        /// Decoder detail.
        message: String,
    },

    /// Allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// The storage engine could not be opened.
    #[error("engine init failed: {message}")]
    EngineInitFailed {
        /// Opener detail.
        message: String,
    },

    /// A store or table does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// What was missing.
        message: String,
    },

    /// A capacity limit was hit.
    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        /// Which limit.
        message: String,
    },

    /// The request was cancelled before it completed.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a busy error.
    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy {
            message: message.into(),
        }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a permission-denied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a resource-exhausted error.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Busy { .. } | SyncError::Network { .. })
    }

    /// Returns true if the failure means the store is locked; such retries
    /// wait longer.
    pub fn is_locked(&self) -> bool {
        matches!(self, SyncError::Busy { .. })
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidArgument { message } => Self::InvalidArgument { message },
            StorageError::OutOfMemory => Self::OutOfMemory,
            StorageError::EngineInitFailed { message } => Self::EngineInitFailed { message },
            StorageError::Busy { message } => Self::Busy { message },
            StorageError::Stale => Self::busy("store is closing"),
            StorageError::Closed => Self::not_found("store is closed"),
            StorageError::TableNotFound { table } => Self::not_found(format!("table {table}")),
            StorageError::SchemaMismatch { table, message } => Self::SchemaMismatch {
                message: format!("{table}: {message}"),
            },
            StorageError::Codec(e) => e.into(),
        }
    }
}

impl From<CodecError> for SyncError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::FieldCountMismatch { .. } => Self::SchemaMismatch {
                message: err.to_string(),
            },
            CodecError::OutOfMemory { .. } => Self::OutOfMemory,
            other => Self::ParseFailure {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::busy("locked").is_retryable());
        assert!(SyncError::network("offline").is_retryable());
        assert!(SyncError::busy("locked").is_locked());
        assert!(!SyncError::network("offline").is_locked());
        assert!(!SyncError::invalid_argument("x").is_retryable());
        assert!(!SyncError::permission_denied("x").is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::OutOfMemory.is_retryable());
    }

    #[test]
    fn decode_failures_are_permanent() {
        let err: SyncError = CodecError::InvalidUtf8.into();
        assert!(matches!(err, SyncError::ParseFailure { .. }));
        assert!(!err.is_retryable());

        let err: SyncError = StorageError::Codec(CodecError::OutOfMemory { requested: 8 }).into();
        assert_eq!(err, SyncError::OutOfMemory);
    }

    #[test]
    fn storage_contention_is_retryable() {
        let err: SyncError = StorageError::busy("writer").into();
        assert!(err.is_locked());
        let err: SyncError = StorageError::Stale.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::Cancelled;
        assert_eq!(err.to_string(), "sync cancelled");
        let err = SyncError::network("unreachable");
        assert!(err.to_string().contains("unreachable"));
    }
}

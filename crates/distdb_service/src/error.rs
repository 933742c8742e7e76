//! Error types and caller-facing status codes.

use distdb_storage::StorageError;
use distdb_sync::{RequestId, SyncError};
use thiserror::Error;

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors returned by the data service.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Malformed caller parameters.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong.
        message: String,
    },

    /// The caller may not access the store.
    #[error("permission denied: {bundle}/{store}")]
    PermissionDenied {
        /// Calling bundle.
        bundle: String,
        /// Requested store.
        store: String,
    },

    /// A session cap was reached.
    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        /// Which cap.
        message: String,
    },

    /// Nothing matched the lookup.
    #[error("not found: {message}")]
    NotFound {
        /// What was looked up.
        message: String,
    },

    /// Stored metadata conflicts with the caller's parameters.
    #[error("metadata conflict for {store}: {message}")]
    MetaConflict {
        /// Store name.
        store: String,
        /// Which attribute changed.
        message: String,
    },

    /// The metadata store failed.
    #[error("metadata error: {message}")]
    Meta {
        /// Failure detail.
        message: String,
    },

    /// A blocking sync did not finish in time.
    #[error("sync request {request_id} did not finish in time")]
    Timeout {
        /// The request still in flight.
        request_id: RequestId,
    },

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Sync error.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a resource-exhausted error.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a metadata error.
    pub fn meta(message: impl Into<String>) -> Self {
        Self::Meta {
            message: message.into(),
        }
    }

    /// Status code reported to the caller.
    pub fn status(&self) -> Status {
        match self {
            ServiceError::InvalidArgument { .. } => Status::InvalidArgument,
            ServiceError::PermissionDenied { .. } => Status::PermissionDenied,
            ServiceError::ResourceExhausted { .. } => Status::ResourceExhausted,
            ServiceError::NotFound { .. } => Status::NotFound,
            ServiceError::MetaConflict { .. }
            | ServiceError::Meta { .. }
            | ServiceError::Timeout { .. }
            | ServiceError::Io(_) => Status::Error,
            ServiceError::Config(_) => Status::InvalidArgument,
            ServiceError::Storage(e) => Status::from(&SyncError::from(e.clone())),
            ServiceError::Sync(e) => Status::from(e),
        }
    }
}

/// Caller-facing status codes. The numeric values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    /// Operation succeeded.
    Success = 0,
    /// Unclassified failure.
    Error = 1,
    /// Malformed parameters.
    InvalidArgument = 2,
    /// Allocation failed.
    OutOfMemory = 3,
    /// The storage engine could not be opened.
    EngineInitFailed = 4,
    /// The store is locked by another operation.
    Busy = 5,
    /// Target does not exist.
    NotFound = 6,
    /// Malformed wire data.
    ParseFailure = 7,
    /// Access denied.
    PermissionDenied = 8,
    /// Session or task cap reached.
    ResourceExhausted = 9,
    /// Schemas disagree.
    SchemaMismatch = 10,
    /// Peer or cloud unreachable.
    NetworkError = 11,
    /// Request was cancelled.
    Cancelled = 12,
}

impl Status {
    /// Numeric code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Status of a finished operation.
    pub fn of<T>(result: &ServiceResult<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(e) => e.status(),
        }
    }
}

impl From<&SyncError> for Status {
    fn from(error: &SyncError) -> Self {
        match error {
            SyncError::InvalidArgument { .. } => Status::InvalidArgument,
            SyncError::Busy { .. } => Status::Busy,
            SyncError::Network { .. } => Status::NetworkError,
            SyncError::PermissionDenied { .. } => Status::PermissionDenied,
            SyncError::SchemaMismatch { .. } => Status::SchemaMismatch,
            SyncError::ParseFailure { .. } => Status::ParseFailure,
            SyncError::OutOfMemory => Status::OutOfMemory,
            SyncError::EngineInitFailed { .. } => Status::EngineInitFailed,
            SyncError::NotFound { .. } => Status::NotFound,
            SyncError::ResourceExhausted { .. } => Status::ResourceExhausted,
            SyncError::Cancelled => Status::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Status::Success.code(), 0);
        assert_eq!(Status::ResourceExhausted.code(), 9);
        assert_eq!(Status::Cancelled.code(), 12);
    }

    #[test]
    fn storage_errors_map_through_sync_taxonomy() {
        let err = ServiceError::from(StorageError::busy("writer slot"));
        assert_eq!(err.status(), Status::Busy);
        let err = ServiceError::from(StorageError::Stale);
        assert_eq!(err.status(), Status::Busy);
    }

    #[test]
    fn status_of_result() {
        let ok: ServiceResult<()> = Ok(());
        assert_eq!(Status::of(&ok), Status::Success);
        let err: ServiceResult<()> = Err(ServiceError::resource_exhausted("cap"));
        assert_eq!(Status::of(&err), Status::ResourceExhausted);
    }

    #[test]
    fn error_display() {
        let err = ServiceError::PermissionDenied {
            bundle: "com.example".into(),
            store: "notes".into(),
        };
        assert!(err.to_string().contains("com.example/notes"));
    }
}

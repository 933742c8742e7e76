//! Error types for storage operations.

use distdb_codec::CodecError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while opening or using a store.
///
/// Cloneable so that one failure can be reported to every caller that
/// shared the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A caller-supplied argument is invalid.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong.
        message: String,
    },

    /// Allocation failed while opening or reading.
    #[error("out of memory")]
    OutOfMemory,

    /// The engine could not be constructed.
    #[error("engine init failed: {message}")]
    EngineInitFailed {
        /// Reason reported by the opener.
        message: String,
    },

    /// The store or a handle slot is held by another operation.
    #[error("store busy: {message}")]
    Busy {
        /// What was busy.
        message: String,
    },

    /// The requested table does not exist.
    #[error("table not found: {table}")]
    TableNotFound {
        /// Table name.
        table: String,
    },

    /// Rows do not fit the table schema.
    #[error("schema mismatch on {table}: {message}")]
    SchemaMismatch {
        /// Table name.
        table: String,
        /// Mismatch detail.
        message: String,
    },

    /// The store is shutting down; a fresh instance must be opened.
    #[error("store is closing")]
    Stale,

    /// The store is closed.
    #[error("store is closed")]
    Closed,

    /// Row encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl StorageError {
    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an engine-init error.
    pub fn engine_init(message: impl Into<String>) -> Self {
        Self::EngineInitFailed {
            message: message.into(),
        }
    }

    /// Creates a busy error.
    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy {
            message: message.into(),
        }
    }

    /// Creates a schema-mismatch error.
    pub fn schema_mismatch(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Returns true if retrying the operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::Stale)
    }
}

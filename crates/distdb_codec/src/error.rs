//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during row encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The row's column count does not match the field list.
    #[error("field count mismatch: row has {actual} columns, schema has {expected}")]
    FieldCountMismatch {
        /// Number of fields in the schema.
        expected: usize,
        /// Number of columns in the row.
        actual: usize,
    },

    /// A value carries a storage type with no registered serializer.
    #[error("unsupported storage type code: {code}")]
    UnsupportedType {
        /// The raw storage type code.
        code: u32,
    },

    /// Malformed wire data.
    #[error("parse failure: {message}")]
    ParseFailure {
        /// Description of the malformed input.
        message: String,
    },

    /// Read ran past the end of the buffer.
    #[error("unexpected end of input: need {needed} bytes at offset {offset}, have {available}")]
    UnexpectedEof {
        /// Offset of the failed read.
        offset: usize,
        /// Number of bytes requested.
        needed: usize,
        /// Number of bytes remaining.
        available: usize,
    },

    /// Declared column count exceeds the hard ceiling.
    #[error("column count {count} exceeds limit {max}")]
    TooManyColumns {
        /// Declared column count.
        count: u64,
        /// Maximum allowed column count.
        max: u64,
    },

    /// A single text/blob value is over the size limit.
    #[error("value size {size} exceeds limit {max}")]
    ValueTooLarge {
        /// Declared value size.
        size: u64,
        /// Maximum allowed value size.
        max: u64,
    },

    /// Text value is not valid UTF-8.
    #[error("invalid UTF-8 text value")]
    InvalidUtf8,

    /// Buffer allocation failed.
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory {
        /// Number of bytes requested.
        requested: usize,
    },
}

impl CodecError {
    /// Create a parse failure error.
    pub fn parse_failure(message: impl Into<String>) -> Self {
        Self::ParseFailure {
            message: message.into(),
        }
    }

    /// Returns true if this error means the input bytes are malformed.
    ///
    /// Malformed data never becomes valid on retry, so callers treat these
    /// as permanent failures.
    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            CodecError::ParseFailure { .. }
                | CodecError::UnexpectedEof { .. }
                | CodecError::TooManyColumns { .. }
                | CodecError::ValueTooLarge { .. }
                | CodecError::InvalidUtf8
                | CodecError::UnsupportedType { .. }
        )
    }
}

//! Typed column values.

use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage type code written in front of every value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum StorageType {
    /// SQL NULL.
    Null = 1,
    /// 64-bit signed integer.
    Integer = 2,
    /// 64-bit IEEE float.
    Real = 3,
    /// UTF-8 text.
    Text = 4,
    /// Opaque bytes.
    Blob = 5,
    /// Boolean.
    Bool = 6,
}

impl StorageType {
    /// Returns the wire code of this type.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Returns a lowercase name, as used in schemas.
    pub fn name(self) -> &'static str {
        match self {
            StorageType::Null => "null",
            StorageType::Integer => "integer",
            StorageType::Real => "real",
            StorageType::Text => "text",
            StorageType::Blob => "blob",
            StorageType::Bool => "bool",
        }
    }
}

impl TryFrom<u32> for StorageType {
    type Error = CodecError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(StorageType::Null),
            2 => Ok(StorageType::Integer),
            3 => Ok(StorageType::Real),
            4 => Ok(StorageType::Text),
            5 => Ok(StorageType::Blob),
            6 => Ok(StorageType::Bool),
            _ => Err(CodecError::UnsupportedType { code }),
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single column value.
///
/// Column order in a row is positional and fixed by the schema at encode
/// time; values carry no field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point value.
    Real(f64),
    /// Text value (UTF-8).
    Text(String),
    /// Byte string.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns the storage type this value is written as.
    pub fn storage_type(&self) -> StorageType {
        match self {
            Value::Null => StorageType::Null,
            Value::Bool(_) => StorageType::Bool,
            Value::Integer(_) => StorageType::Integer,
            Value::Real(_) => StorageType::Real,
            Value::Text(_) => StorageType::Text,
            Value::Blob(_) => StorageType::Blob,
        }
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer, if this is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes, if this is a blob.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

//! Rows with change-log metadata and their wire form.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Change-log metadata carried alongside every synchronized row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogInfo {
    /// Logical modification timestamp.
    pub timestamp: u64,
    /// Wall-clock time the row was written.
    pub write_timestamp: u64,
    /// Device that first created the row.
    pub origin_device: String,
    /// Device that holds this version.
    pub device: String,
    /// Primary-key hash identifying the row across replicas.
    pub hash_key: Vec<u8>,
    /// Bit flags, see [`LogInfo::DELETE_FLAG`].
    pub flags: u64,
}

impl LogInfo {
    /// Row is a delete tombstone.
    pub const DELETE_FLAG: u64 = 0x01;
    /// Row was written locally.
    pub const LOCAL_FLAG: u64 = 0x02;

    /// Returns true if the delete bit is set.
    pub fn is_deleted(&self) -> bool {
        self.flags & Self::DELETE_FLAG != 0
    }
}

/// A row's typed column values plus its log metadata.
///
/// If the log's delete bit is set the columns are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowWithLog {
    /// Column values in schema order.
    pub columns: Vec<Value>,
    /// Change-log metadata.
    pub log: LogInfo,
}

impl RowWithLog {
    /// Creates a live row.
    pub fn new(columns: Vec<Value>, log: LogInfo) -> Self {
        Self { columns, log }
    }

    /// Creates a delete tombstone for `hash_key`.
    pub fn tombstone(hash_key: Vec<u8>, timestamp: u64, device: impl Into<String>) -> Self {
        let device = device.into();
        Self {
            columns: Vec::new(),
            log: LogInfo {
                timestamp,
                write_timestamp: timestamp,
                origin_device: device.clone(),
                device,
                hash_key,
                flags: LogInfo::DELETE_FLAG,
            },
        }
    }

    /// Returns true if this row is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.log.is_deleted()
    }
}

/// The unit exchanged between replicas: encoded column bytes plus the
/// flattened log fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItem {
    /// Encoded column values.
    pub value: Vec<u8>,
    /// Logical modification timestamp.
    pub timestamp: u64,
    /// Wall-clock write timestamp.
    pub write_timestamp: u64,
    /// Device holding this version.
    pub device: String,
    /// Device that created the row.
    pub origin_device: String,
    /// Row flags.
    pub flags: u64,
    /// Primary-key hash.
    pub hash_key: Vec<u8>,
}

impl DataItem {
    /// Returns true if the delete bit is set.
    pub fn is_deleted(&self) -> bool {
        self.flags & LogInfo::DELETE_FLAG != 0
    }

    pub(crate) fn with_log(value: Vec<u8>, log: &LogInfo) -> Self {
        Self {
            value,
            timestamp: log.timestamp,
            write_timestamp: log.write_timestamp,
            device: log.device.clone(),
            origin_device: log.origin_device.clone(),
            flags: log.flags,
            hash_key: log.hash_key.clone(),
        }
    }

    pub(crate) fn log(&self) -> LogInfo {
        LogInfo {
            timestamp: self.timestamp,
            write_timestamp: self.write_timestamp,
            origin_device: self.origin_device.clone(),
            device: self.device.clone(),
            hash_key: self.hash_key.clone(),
            flags: self.flags,
        }
    }
}

//! Schema field lists and remote-to-local column mapping.

use crate::value::{StorageType, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One column of a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Column name.
    pub name: String,
    /// Declared storage type.
    pub storage_type: StorageType,
}

impl FieldInfo {
    /// Creates a field.
    pub fn new(name: impl Into<String>, storage_type: StorageType) -> Self {
        Self {
            name: name.into(),
            storage_type,
        }
    }
}

/// Raw sentinel used for local fields absent from the remote schema.
pub const NOT_FOUND: i32 = -1;

/// For each local field, the index of the same-named field in the remote
/// field list, or `None` if the remote schema lacks it.
///
/// Built once per (remote, local) schema pair and reused for every row in
/// a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    indices: Vec<Option<usize>>,
}

impl FieldMapping {
    /// Builds the mapping in O(n) via a name table over `remote`.
    ///
    /// If `remote` contains a duplicate name, the last occurrence wins.
    pub fn build(remote: &[FieldInfo], local: &[FieldInfo]) -> Self {
        let by_name: HashMap<&str, usize> = remote
            .iter()
            .enumerate()
            .map(|(i, field)| (field.name.as_str(), i))
            .collect();
        let indices = local
            .iter()
            .map(|field| by_name.get(field.name.as_str()).copied())
            .collect();
        Self { indices }
    }

    /// Mapping that keeps every column in place.
    pub fn identity(len: usize) -> Self {
        Self {
            indices: (0..len).map(Some).collect(),
        }
    }

    /// Number of local fields.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if the local schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Remote index for local field `local_index`.
    pub fn get(&self, local_index: usize) -> Option<usize> {
        self.indices.get(local_index).copied().flatten()
    }

    /// Returns the mapping with [`NOT_FOUND`] in place of missing fields.
    pub fn to_raw(&self) -> Vec<i32> {
        self.indices
            .iter()
            .map(|idx| idx.map_or(NOT_FOUND, |i| i as i32))
            .collect()
    }

    /// Re-projects remote-ordered values into local column order.
    ///
    /// Local fields with no remote counterpart, or whose remote index is out
    /// of range for `remote_values`, are filled with [`Value::Null`].
    pub fn project(&self, remote_values: &[Value]) -> Vec<Value> {
        self.indices
            .iter()
            .map(|idx| {
                idx.and_then(|i| remote_values.get(i))
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect()
    }
}

/// Builds a [`FieldMapping`] from remote and local field lists.
pub fn build_field_mapping(remote: &[FieldInfo], local: &[FieldInfo]) -> FieldMapping {
    FieldMapping::build(remote, local)
}

//! Store metadata persistence.
//!
//! Metadata lives in two namespaces: `local` entries stay on this device,
//! the others are shared with peers. Keys are built by
//! [`StoreMetaData::key`].

use crate::error::{ServiceError, ServiceResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

const KEY_PREFIX: &str = "KvStoreMetaData";
const KEY_SEPARATOR: &str = "###";

/// Persisted description of one store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreMetaData {
    /// Device holding the store.
    pub device_id: String,
    /// Owning account.
    pub user: String,
    /// Owning bundle.
    pub bundle_name: String,
    /// Application id.
    pub app_id: String,
    /// Store id.
    pub store_id: String,
    /// Module inside the bundle.
    pub hap_name: String,
    /// Store kind.
    pub store_type: i32,
    /// Security level.
    pub security_level: i32,
    /// Storage area.
    pub area: i32,
    /// Whether the store is encrypted.
    pub encrypted: bool,
    /// Directory of the store files.
    pub data_dir: String,
    /// App clone index.
    pub instance_id: i32,
    /// Owning uid.
    pub uid: u32,
    /// Owning access token.
    pub token: u32,
}

impl StoreMetaData {
    /// Metadata key of this store.
    pub fn key(&self) -> String {
        [
            KEY_PREFIX,
            &self.device_id,
            &self.user,
            "default",
            &self.bundle_name,
            &self.store_id,
        ]
        .join(KEY_SEPARATOR)
    }

    /// Key prefix selecting every store under `fields`, e.g. `&[device]`.
    pub fn prefix(fields: &[&str]) -> String {
        let mut prefix = String::from(KEY_PREFIX);
        for field in fields {
            prefix.push_str(KEY_SEPARATOR);
            prefix.push_str(field);
        }
        prefix.push_str(KEY_SEPARATOR);
        prefix
    }
}

/// Metadata storage boundary.
pub trait MetaStore: Send + Sync {
    /// Loads every entry whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn load_meta(&self, prefix: &str, is_local: bool) -> ServiceResult<Vec<StoreMetaData>>;

    /// Loads one entry.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn load(&self, key: &str, is_local: bool) -> ServiceResult<Option<StoreMetaData>>;

    /// Stores `value` under `key`. Returns false if the store refused it.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn save_meta(&self, key: &str, value: &StoreMetaData, is_local: bool) -> ServiceResult<bool>;

    /// Removes `key`. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn delete_meta(&self, key: &str, is_local: bool) -> ServiceResult<bool>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct Namespaces {
    local: BTreeMap<String, StoreMetaData>,
    shared: BTreeMap<String, StoreMetaData>,
}

impl Namespaces {
    fn get(&self, is_local: bool) -> &BTreeMap<String, StoreMetaData> {
        if is_local {
            &self.local
        } else {
            &self.shared
        }
    }

    fn get_mut(&mut self, is_local: bool) -> &mut BTreeMap<String, StoreMetaData> {
        if is_local {
            &mut self.local
        } else {
            &mut self.shared
        }
    }

    fn scan(&self, prefix: &str, is_local: bool) -> Vec<StoreMetaData> {
        self.get(is_local)
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v.clone())
            .collect()
    }
}

/// Metadata kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    entries: RwLock<Namespaces>,
}

impl MemoryMetaStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for MemoryMetaStore {
    fn load_meta(&self, prefix: &str, is_local: bool) -> ServiceResult<Vec<StoreMetaData>> {
        Ok(self.entries.read().scan(prefix, is_local))
    }

    fn load(&self, key: &str, is_local: bool) -> ServiceResult<Option<StoreMetaData>> {
        Ok(self.entries.read().get(is_local).get(key).cloned())
    }

    fn save_meta(&self, key: &str, value: &StoreMetaData, is_local: bool) -> ServiceResult<bool> {
        self.entries
            .write()
            .get_mut(is_local)
            .insert(key.to_string(), value.clone());
        Ok(true)
    }

    fn delete_meta(&self, key: &str, is_local: bool) -> ServiceResult<bool> {
        Ok(self.entries.write().get_mut(is_local).remove(key).is_some())
    }
}

/// Metadata persisted as one JSON file.
///
/// The whole file is rewritten on every change through a temporary file
/// and a rename.
#[derive(Debug)]
pub struct JsonFileMetaStore {
    path: PathBuf,
    entries: RwLock<Namespaces>,
}

impl JsonFileMetaStore {
    /// Opens the store at `path`, loading it if the file exists.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read and `Meta` if it is not
    /// valid metadata.
    pub fn open(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str(&data)
                .map_err(|e| ServiceError::meta(format!("{}: {e}", path.display())))?
        } else {
            Namespaces::default()
        };
        debug!(path = %path.display(), "metadata store opened");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// File backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &Namespaces) -> ServiceResult<()> {
        let data = serde_json::to_string_pretty(entries)
            .map_err(|e| ServiceError::meta(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl MetaStore for JsonFileMetaStore {
    fn load_meta(&self, prefix: &str, is_local: bool) -> ServiceResult<Vec<StoreMetaData>> {
        Ok(self.entries.read().scan(prefix, is_local))
    }

    fn load(&self, key: &str, is_local: bool) -> ServiceResult<Option<StoreMetaData>> {
        Ok(self.entries.read().get(is_local).get(key).cloned())
    }

    fn save_meta(&self, key: &str, value: &StoreMetaData, is_local: bool) -> ServiceResult<bool> {
        let mut entries = self.entries.write();
        let previous = entries
            .get_mut(is_local)
            .insert(key.to_string(), value.clone());
        if let Err(e) = self.persist(&entries) {
            let map = entries.get_mut(is_local);
            match previous {
                Some(old) => map.insert(key.to_string(), old),
                None => map.remove(key),
            };
            return Err(e);
        }
        Ok(true)
    }

    fn delete_meta(&self, key: &str, is_local: bool) -> ServiceResult<bool> {
        let mut entries = self.entries.write();
        let Some(old) = entries.get_mut(is_local).remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&entries) {
            entries.get_mut(is_local).insert(key.to_string(), old);
            return Err(e);
        }
        Ok(true)
    }
}

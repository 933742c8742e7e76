//! Storage engine boundary.

use crate::error::StorageResult;
use crate::identity::StoreIdentity;
use distdb_codec::{FieldInfo, RowWithLog, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::Zeroizing;

/// An opened storage engine shared by every connection of one store.
///
/// The engine is opaque to the sync core: it stores rows with their log
/// metadata and answers filtered reads. Conflict resolution happens inside
/// [`write`](Self::write).
///
/// # Invariants
///
/// - `close` is called exactly once, after the last connection is released
/// - Engines must be `Send + Sync`; concurrent readers are allowed and
///   concurrent writers are serialized by the engine
///
/// # Implementors
///
/// - [`super::InMemoryEngine`] - Reference engine for tests and simulation
pub trait StorageEngine: Send + Sync {
    /// Creates `table` with `fields`, or checks an existing table matches.
    ///
    /// # Errors
    ///
    /// Returns a schema mismatch if the table exists with different fields.
    fn create_table(&self, table: &str, fields: &[FieldInfo]) -> StorageResult<()>;

    /// Returns the field list of `table`.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the table does not exist.
    fn schema(&self, table: &str) -> StorageResult<Vec<FieldInfo>>;

    /// Reads rows matching `query`, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the table or a filtered column does not exist.
    fn read(&self, table: &str, query: &ReadQuery) -> StorageResult<Vec<RowWithLog>>;

    /// Applies rows with their log metadata. Returns how many were applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or a row does not fit it.
    fn write(&self, table: &str, rows: &[RowWithLog]) -> StorageResult<usize>;

    /// Marks whether any connection currently references the engine.
    fn set_connection_flag(&self, active: bool);

    /// Returns the flag last set by [`set_connection_flag`](Self::set_connection_flag).
    fn has_connection(&self) -> bool;

    /// Releases engine resources.
    fn close(&self);
}

/// Opens engines from store properties.
pub trait EngineOpener: Send + Sync {
    /// Opens the engine described by `properties`.
    ///
    /// # Errors
    ///
    /// Returns `EngineInitFailed` or `OutOfMemory` if construction fails.
    fn open(&self, properties: &StoreProperties) -> StorageResult<Arc<dyn StorageEngine>>;
}

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Column name.
    pub column: String,
    /// Required value.
    pub value: Value,
}

/// Filter for [`StorageEngine::read`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadQuery {
    /// Only rows with a log timestamp strictly greater than this.
    pub since: u64,
    /// All conditions must match. Tombstones never match a condition.
    pub conditions: Vec<Condition>,
    /// Maximum number of rows returned.
    pub limit: Option<usize>,
}

impl ReadQuery {
    /// Reads every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Sets the timestamp watermark.
    pub fn with_since(mut self, since: u64) -> Self {
        self.since = since;
        self
    }

    /// Adds an equality condition.
    pub fn with_condition(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// Caps the number of rows returned.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Cipher used by encrypted stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CipherType {
    /// AES-256-GCM.
    #[default]
    Aes256Gcm,
    /// AES-256-CBC.
    Aes256Cbc,
}

/// Capacity of the connection handle pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnginePoolConfig {
    /// Dedicated writer slots.
    pub writers: usize,
    /// Reader slots.
    pub readers: usize,
}

impl Default for EnginePoolConfig {
    fn default() -> Self {
        Self {
            writers: 1,
            readers: 16,
        }
    }
}

impl EnginePoolConfig {
    /// Sets the writer slot count.
    pub fn with_writers(mut self, writers: usize) -> Self {
        self.writers = writers;
        self
    }

    /// Sets the reader slot count.
    pub fn with_readers(mut self, readers: usize) -> Self {
        self.readers = readers;
        self
    }
}

/// Everything needed to open one store's engine.
#[derive(Clone)]
pub struct StoreProperties {
    /// Who owns the store.
    pub identity: StoreIdentity,
    /// Directory holding the store files.
    pub data_dir: PathBuf,
    /// Whether the store is encrypted at rest.
    pub encrypted: bool,
    /// Cipher for encrypted stores.
    pub cipher: CipherType,
    /// Key material for encrypted stores; wiped on drop.
    pub password: Zeroizing<Vec<u8>>,
    /// Handle pool capacity.
    pub pool: EnginePoolConfig,
}

impl StoreProperties {
    /// Creates properties for an unencrypted store.
    pub fn new(identity: StoreIdentity, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            identity,
            data_dir: data_dir.into(),
            encrypted: false,
            cipher: CipherType::default(),
            password: Zeroizing::new(Vec::new()),
            pool: EnginePoolConfig::default(),
        }
    }

    /// Marks the store encrypted with `cipher` and `password`.
    pub fn with_encryption(mut self, cipher: CipherType, password: Vec<u8>) -> Self {
        self.encrypted = true;
        self.cipher = cipher;
        self.password = Zeroizing::new(password);
        self
    }

    /// Sets the handle pool capacity.
    pub fn with_pool(mut self, pool: EnginePoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// True if the store is encrypted and a password was supplied.
    pub fn has_password(&self) -> bool {
        self.encrypted && !self.password.is_empty()
    }
}

impl fmt::Debug for StoreProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreProperties")
            .field("identity", &self.identity)
            .field("data_dir", &self.data_dir)
            .field("encrypted", &self.encrypted)
            .field("cipher", &self.cipher)
            .field("password", &"[REDACTED]")
            .field("pool", &self.pool)
            .finish()
    }
}

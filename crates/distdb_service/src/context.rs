//! Caller identity and per-call store parameters.

use crate::error::{ServiceError, ServiceResult};
use std::fmt;
use zeroize::Zeroizing;

/// Who is calling: the IPC-level identity of a client process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessContext {
    /// Calling process.
    pub pid: u32,
    /// Calling uid.
    pub uid: u32,
    /// Access token of the calling application.
    pub token: u32,
    /// Account the caller runs as.
    pub user: u32,
}

impl ProcessContext {
    /// Creates a context.
    pub fn new(pid: u32, uid: u32, token: u32, user: u32) -> Self {
        Self {
            pid,
            uid,
            token,
            user,
        }
    }
}

/// Store parameters sent with every caller request.
#[derive(Clone, Default)]
pub struct SyncerParam {
    /// Calling bundle; also the store's app id.
    pub bundle_name: String,
    /// Store file name, `.db` suffix optional.
    pub store_name: String,
    /// Module inside the bundle.
    pub hap_name: String,
    /// Store kind.
    pub store_type: i32,
    /// Security level.
    pub level: i32,
    /// Storage area.
    pub area: i32,
    /// Whether the store is encrypted.
    pub encrypted: bool,
    /// Store password; a non-empty password forces a new session.
    pub password: Zeroizing<Vec<u8>>,
    /// Schema version; `-1` means the caller has no schema.
    pub schema_version: i32,
}

impl SyncerParam {
    /// Parameters for `store_name` of `bundle_name`.
    pub fn new(bundle_name: impl Into<String>, store_name: impl Into<String>) -> Self {
        Self {
            bundle_name: bundle_name.into(),
            store_name: store_name.into(),
            ..Self::default()
        }
    }

    /// Marks the store encrypted with `password`.
    pub fn with_password(mut self, password: Vec<u8>) -> Self {
        self.encrypted = true;
        self.password = Zeroizing::new(password);
        self
    }

    /// Sets the schema version.
    pub fn with_schema_version(mut self, version: i32) -> Self {
        self.schema_version = version;
        self
    }

    /// Sets the storage area.
    pub fn with_area(mut self, area: i32) -> Self {
        self.area = area;
        self
    }

    /// Sets the store type.
    pub fn with_store_type(mut self, store_type: i32) -> Self {
        self.store_type = store_type;
        self
    }

    /// Store id: the store name without its `.db` suffix.
    pub fn store_id(&self) -> &str {
        self.store_name
            .strip_suffix(".db")
            .unwrap_or(&self.store_name)
    }

    /// Rejects parameters with an empty bundle or store.
    pub fn validate(&self) -> ServiceResult<()> {
        if self.bundle_name.is_empty() {
            return Err(ServiceError::invalid_argument("empty bundle name"));
        }
        if self.store_id().is_empty() {
            return Err(ServiceError::invalid_argument("empty store name"));
        }
        Ok(())
    }
}

impl fmt::Debug for SyncerParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncerParam")
            .field("bundle_name", &self.bundle_name)
            .field("store_name", &self.store_name)
            .field("store_type", &self.store_type)
            .field("area", &self.area)
            .field("encrypted", &self.encrypted)
            .field("schema_version", &self.schema_version)
            .finish_non_exhaustive()
    }
}

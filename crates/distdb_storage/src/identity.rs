//! Store identity and the identifiers derived from it.

use crate::error::{StorageError, StorageResult};
use sha2::{Digest, Sha256};
use std::fmt::{self, Write};

/// Prefix of the per-device mirror tables created for distributed tables.
const DISTRIBUTED_TABLE_PREFIX: &str = "naturalbase_rdb_aux_";

/// Identity of a store: owning user, application and store name.
///
/// Two identities are equal iff all three fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreIdentity {
    /// Owning user (account id as a string).
    pub user: String,
    /// Application / bundle name.
    pub app_id: String,
    /// Store name within the application.
    pub store_id: String,
}

impl StoreIdentity {
    /// Creates an identity.
    pub fn new(
        user: impl Into<String>,
        app_id: impl Into<String>,
        store_id: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            app_id: app_id.into(),
            store_id: store_id.into(),
        }
    }

    /// Rejects identities with an empty field.
    pub fn validate(&self) -> StorageResult<()> {
        for (name, value) in [
            ("user", &self.user),
            ("app_id", &self.app_id),
            ("store_id", &self.store_id),
        ] {
            if value.is_empty() {
                return Err(StorageError::invalid_argument(format!("empty {name}")));
            }
        }
        Ok(())
    }

    /// Cross-device identifier: SHA-256 of `"{user}-{app_id}-{store_id}"`.
    ///
    /// The concatenation order is part of the persisted format and must not
    /// change.
    pub fn identifier(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.user.as_bytes());
        hasher.update(b"-");
        hasher.update(self.app_id.as_bytes());
        hasher.update(b"-");
        hasher.update(self.store_id.as_bytes());
        hasher.finalize().into()
    }

    /// [`identifier`](Self::identifier) as lowercase hex.
    pub fn identifier_hex(&self) -> String {
        to_hex(&self.identifier())
    }

    /// Short form of the identifier safe to write to logs.
    pub fn anonymous(&self) -> String {
        anonymize(&self.identifier_hex())
    }
}

impl fmt::Display for StoreIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_id, self.store_id)
    }
}

/// Name of the local mirror table holding `table` rows synced from `device`.
pub fn distributed_table_name(device: &str, table: &str) -> String {
    let digest = Sha256::digest(device.as_bytes());
    format!("{DISTRIBUTED_TABLE_PREFIX}{table}_{}", to_hex(&digest))
}

/// Truncates an identifier for logging.
pub fn anonymize(identifier: &str) -> String {
    identifier.chars().take(6).collect()
}

/// Lowercase hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

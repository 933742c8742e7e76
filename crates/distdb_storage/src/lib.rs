//! # distdb Storage
//!
//! Storage engine boundary and connection lifecycle for distdb.
//!
//! Engines are opaque row stores behind [`StorageEngine`]. Every caller of
//! one store shares a single engine through a [`SharedStore`]; callers hold
//! [`Connection`]s, and the engine lives exactly as long as the longest
//! held connection.
//!
//! ## Components
//!
//! - [`StorageEngine`] / [`EngineOpener`] - The engine boundary
//! - [`InMemoryEngine`] - Reference engine for tests and simulation
//! - [`HandlePool`] - One writer slot and a bounded set of reader slots
//! - [`SharedStore`] - `Unopened -> Open(n) -> Closing -> Closed`
//! - [`StoreCache`] - Get-or-open by identity, retrying stores that are closing
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use distdb_storage::{InMemoryOpener, LifecycleState, StoreCache, StoreIdentity, StoreProperties};
//!
//! let cache = StoreCache::new(Arc::new(InMemoryOpener::new()));
//! let props = StoreProperties::new(StoreIdentity::new("100", "com.example", "notes"), "/data/notes");
//! let conn = cache.acquire(&props).unwrap();
//! let store = conn.store();
//! assert_eq!(store.state(), LifecycleState::Open(1));
//! drop(conn);
//! assert_eq!(store.state(), LifecycleState::Closed);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod engine;
mod error;
mod identity;
mod memory;
mod pool;
mod store;

pub use cache::{StoreCache, StoreCacheConfig};
pub use engine::{
    CipherType, Condition, EngineOpener, EnginePoolConfig, ReadQuery, StorageEngine,
    StoreProperties,
};
pub use error::{StorageError, StorageResult};
pub use identity::{anonymize, distributed_table_name, to_hex, StoreIdentity};
pub use memory::{InMemoryEngine, InMemoryOpener};
pub use pool::{HandleGuard, HandleKind, HandlePool};
pub use store::{CloseNotifier, Connection, LifecycleState, SharedStore};

//! # distdb Service
//!
//! The caller-facing side of distdb: per-process sync sessions, the sync
//! API, schema registration and notifications.
//!
//! ## Architecture
//!
//! ```text
//! DataService
//!   ├── AccessChecker      gate every call
//!   ├── SyncerRegistry     (pid, store) -> SyncerSession, caps, idle timers
//!   │     └── StoreCache   reference-counted store connections
//!   ├── SyncScheduler      dedup, retry, cancel (distdb_sync)
//!   ├── MetaStore          persisted store metadata
//!   ├── EventCenter        FeatureInit / GetSchema / CloudSyncTriggered
//!   └── NotifierRegistry   per-process completion and change callbacks
//! ```
//!
//! One [`DataService`] is built at startup and shared by handle. It owns a
//! single worker pool used for sync attempts, idle timers and event
//! handlers.
//!
//! ## Key Invariants
//!
//! - A process holds at most `max_sessions_per_process` sessions and all
//!   processes together at most `max_sessions`; hitting a cap fails the
//!   call and never evicts a session
//! - Using a session re-arms its idle timer; an evicted or torn-down
//!   session's timer is unregistered while its map entry is locked
//! - Every error maps to a stable [`Status`] code
//!
//! ## Usage
//!
//! ```
//! use distdb_service::{DataService, ProcessContext, SyncerParam, Status};
//!
//! let service = DataService::builder("device-a").build().unwrap();
//! let ctx = ProcessContext::new(4242, 20_000, 7, 100);
//! let param = SyncerParam::new("com.example.notes", "notes.db");
//!
//! let session = service.session(&ctx, &param).unwrap();
//! assert_eq!(session.store_id(), "notes");
//!
//! let result = service.set_distributed_tables(&ctx, &param, &["missing".to_string()]);
//! assert_eq!(Status::of(&result), Status::NotFound);
//! # service.shutdown();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod access;
mod config;
mod context;
mod error;
mod event;
mod meta;
mod notifier;
mod registry;
mod service;

pub use access::{AccessChecker, AllowAll, TokenAccessChecker};
pub use config::{RegistryConfig, ServiceConfig};
pub use context::{ProcessContext, SyncerParam};
pub use error::{ServiceError, ServiceResult, Status};
pub use event::{CloudSyncEvent, Event, EventCenter, EventKind, SchemaInfo};
pub use meta::{JsonFileMetaStore, MemoryMetaStore, MetaStore, StoreMetaData};
pub use notifier::{ChannelNotifier, NotifierReceivers, NotifierRegistry, SyncNotifier};
pub use registry::{SyncerRegistry, SyncerSession};
pub use service::{AutoLaunchParam, DataService, DataServiceBuilder, SyncOption, ENCRYPT_ITERATIONS};

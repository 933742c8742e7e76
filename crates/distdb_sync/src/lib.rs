//! # distdb Sync
//!
//! Sync task scheduling for distdb.
//!
//! This crate provides:
//! - A bounded worker pool with delayed, removable tasks
//! - Request deduplication keyed by store and table set
//! - Retry with bounded exponential backoff, longer when the store is locked
//! - Cancellation by user or owner
//! - A runner that moves rows between a store and a transport through the
//!   row codec
//!
//! ## Architecture
//!
//! ```text
//! submit --> SyncScheduler --> ExecutorPool --> SyncRunner
//!                ^                                  |
//!                +------ retry / complete ----------+
//! ```
//!
//! ## Key Invariants
//!
//! - Every accepted request's callback fires exactly once
//! - Merged requests share one execution and one result
//! - A running attempt is never interrupted and never absorbs new requests
//! - Retries stop at the policy's attempt cap

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod executor;
mod request;
mod runner;
mod scheduler;
mod transport;

pub use config::{PoolConfig, RetryPolicy, SchedulerConfig};
pub use error::{SyncError, SyncResult};
pub use executor::{ExecutorPool, TaskId};
pub use request::{
    make_request_id, request_user, DedupKey, RequestId, RequestOrigin, SyncCallback, SyncMode,
    SyncOutcome, SyncPlan, SyncRequest, SyncSummary, TableSummary, WaitPolicy, USER_MARK,
};
pub use runner::{StoreSyncRunner, SyncRunner};
pub use scheduler::{RequestState, SyncScheduler, UserFilter};
pub use transport::{LoopbackTransport, MockTransport, SyncTransport, TableBatch};

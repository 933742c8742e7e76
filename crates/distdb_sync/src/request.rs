//! Sync requests, their ids and completion callbacks.

use crate::error::{SyncError, SyncResult};
use distdb_storage::{ReadQuery, StoreIdentity, StoreProperties};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::mpsc;
use std::time::Duration;

/// Unique id of a sync request: the submitting user in the high 32 bits,
/// a process-wide counter in the low 32 bits.
pub type RequestId = u64;

/// Mask selecting the user part of a [`RequestId`].
pub const USER_MARK: u64 = 0xFFFF_FFFF_0000_0000;

const USER_SHIFT: u32 = 32;

/// Builds a request id from a user and a counter value.
pub fn make_request_id(user: u32, counter: u32) -> RequestId {
    (u64::from(user) << USER_SHIFT) | u64::from(counter)
}

/// The user a request id belongs to.
pub fn request_user(id: RequestId) -> u32 {
    // Truncation is exact after the shift.
    ((id & USER_MARK) >> USER_SHIFT) as u32
}

/// Direction and conflict preference of a sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Send local changes only.
    Push,
    /// Fetch remote changes only.
    Pull,
    /// Fetch then send.
    PullPush,
    /// Cloud sync, newest timestamp wins.
    #[default]
    CloudTimeFirst,
    /// Cloud sync, local data wins: local changes go out before remote ones
    /// are applied.
    CloudNativeFirst,
    /// Cloud sync, cloud data wins: remote changes are applied first.
    CloudCloudFirst,
}

impl SyncMode {
    /// True if the mode sends local rows.
    pub fn pushes(self) -> bool {
        !matches!(self, SyncMode::Pull)
    }

    /// True if the mode applies remote rows.
    pub fn pulls(self) -> bool {
        !matches!(self, SyncMode::Push)
    }

    /// True if local rows go out before remote rows come in.
    pub fn push_first(self) -> bool {
        matches!(self, SyncMode::Push | SyncMode::CloudNativeFirst)
    }
}

/// Whether the submitting caller waits for the outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Return immediately; the outcome arrives through the callback.
    #[default]
    Async,
    /// Block the caller until the outcome arrives or the timeout passes.
    Block {
        /// Longest time to wait.
        timeout: Duration,
    },
}

/// Who initiated a request; decides the retry cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestOrigin {
    /// Started by the service itself (e.g. a cloud trigger).
    #[default]
    Service,
    /// Started by a client call.
    Client,
}

/// Per-table row counts of a finished sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSummary {
    /// Table name.
    pub table: String,
    /// Rows sent.
    pub pushed: usize,
    /// Rows received.
    pub pulled: usize,
    /// Received rows the engine applied.
    pub applied: usize,
}

/// What a successful sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// One entry per synced table.
    pub tables: Vec<TableSummary>,
    /// Attempts it took, the successful one included.
    pub attempts: u32,
}

impl SyncSummary {
    /// Total rows sent.
    pub fn pushed(&self) -> usize {
        self.tables.iter().map(|t| t.pushed).sum()
    }

    /// Total rows received.
    pub fn pulled(&self) -> usize {
        self.tables.iter().map(|t| t.pulled).sum()
    }
}

/// Terminal result delivered to a request's callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// The request this outcome belongs to.
    pub request_id: RequestId,
    /// Shared result of the task group the request ran in.
    pub result: SyncResult<SyncSummary>,
}

/// Completion callback. Called exactly once.
pub type SyncCallback = Box<dyn FnOnce(SyncOutcome) + Send>;

/// A request to sync some tables of one store.
pub struct SyncRequest {
    /// Submitting user; forms the high half of the request id.
    pub user: u32,
    /// Owner marker (e.g. the caller's pid) used by owner-scoped cancel.
    pub owner: u64,
    /// Store to open.
    pub properties: StoreProperties,
    /// Tables to sync.
    pub tables: BTreeSet<String>,
    /// Sync direction.
    pub mode: SyncMode,
    /// Whether the caller waits.
    pub wait: WaitPolicy,
    /// Optional filter for the rows pushed.
    pub query: Option<ReadQuery>,
    /// Who started the request.
    pub origin: RequestOrigin,
    callback: Option<SyncCallback>,
}

impl SyncRequest {
    /// Creates a request for `tables` of the store in `properties`.
    pub fn new<I, S>(user: u32, properties: StoreProperties, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user,
            owner: 0,
            properties,
            tables: tables.into_iter().map(Into::into).collect(),
            mode: SyncMode::default(),
            wait: WaitPolicy::default(),
            query: None,
            origin: RequestOrigin::default(),
            callback: None,
        }
    }

    /// Sets the owner marker.
    pub fn with_owner(mut self, owner: u64) -> Self {
        self.owner = owner;
        self
    }

    /// Sets the sync mode.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the wait policy.
    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    /// Filters the rows pushed.
    pub fn with_query(mut self, query: ReadQuery) -> Self {
        self.query = Some(query);
        self
    }

    /// Sets who started the request.
    pub fn with_origin(mut self, origin: RequestOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Sets the completion callback.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(SyncOutcome) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Delivers the outcome over a channel instead of a callback.
    pub fn with_channel(self) -> (Self, mpsc::Receiver<SyncOutcome>) {
        let (tx, rx) = mpsc::channel();
        let request = self.with_callback(move |outcome| {
            // The receiver may be gone; nobody is waiting then.
            let _ = tx.send(outcome);
        });
        (request, rx)
    }

    /// Store identity.
    pub fn identity(&self) -> &StoreIdentity {
        &self.properties.identity
    }

    /// Deduplication key of this request.
    pub fn key(&self) -> DedupKey {
        DedupKey {
            identity: self.properties.identity.clone(),
            tables: self.tables.clone(),
        }
    }

    /// Checks the request can be scheduled.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an incomplete identity, no tables, or
    /// an empty table name.
    pub fn validate(&self) -> SyncResult<()> {
        self.properties
            .identity
            .validate()
            .map_err(SyncError::from)?;
        if self.tables.is_empty() {
            return Err(SyncError::invalid_argument("no tables to sync"));
        }
        if self.tables.iter().any(String::is_empty) {
            return Err(SyncError::invalid_argument("empty table name"));
        }
        Ok(())
    }

    pub(crate) fn take_callback(&mut self) -> Option<SyncCallback> {
        self.callback.take()
    }
}

impl fmt::Debug for SyncRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRequest")
            .field("user", &self.user)
            .field("owner", &self.owner)
            .field("store", &self.properties.identity.anonymous())
            .field("tables", &self.tables)
            .field("mode", &self.mode)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Requests with equal keys are merged while queued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    /// Target store.
    pub identity: StoreIdentity,
    /// Requested tables.
    pub tables: BTreeSet<String>,
}

/// The snapshot of a request group handed to a [`crate::SyncRunner`].
#[derive(Debug, Clone)]
pub struct SyncPlan {
    /// Store to open.
    pub properties: StoreProperties,
    /// Tables to sync, in name order.
    pub tables: Vec<String>,
    /// Sync direction.
    pub mode: SyncMode,
    /// Optional push filter.
    pub query: Option<ReadQuery>,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl SyncPlan {
    pub(crate) fn from_request(request: &SyncRequest) -> Self {
        Self {
            properties: request.properties.clone(),
            tables: request.tables.iter().cloned().collect(),
            mode: request.mode,
            query: request.query.clone(),
            attempt: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> StoreProperties {
        StoreProperties::new(StoreIdentity::new("100", "app", "s"), "/data/s")
    }

    #[test]
    fn request_id_layout() {
        let id = make_request_id(7, 3);
        assert_eq!(id, (7u64 << 32) | 3);
        assert_eq!(request_user(id), 7);
        assert_eq!(id & !USER_MARK, 3);
        assert_eq!(request_user(make_request_id(u32::MAX, u32::MAX)), u32::MAX);
    }

    #[test]
    fn key_ignores_table_order() {
        let a = SyncRequest::new(1, props(), ["b", "a"]);
        let b = SyncRequest::new(2, props(), ["a", "b", "a"]);
        assert_eq!(a.key(), b.key());
        let c = SyncRequest::new(1, props(), ["a"]);
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn validation() {
        assert!(SyncRequest::new(1, props(), ["t"]).validate().is_ok());
        assert!(matches!(
            SyncRequest::new(1, props(), Vec::<String>::new()).validate(),
            Err(SyncError::InvalidArgument { .. })
        ));
        assert!(SyncRequest::new(1, props(), [""]).validate().is_err());
        let bad = StoreProperties::new(StoreIdentity::new("", "app", "s"), "/x");
        assert!(SyncRequest::new(1, bad, ["t"]).validate().is_err());
    }

    #[test]
    fn mode_directions() {
        assert!(SyncMode::Push.pushes() && !SyncMode::Push.pulls());
        assert!(SyncMode::Pull.pulls() && !SyncMode::Pull.pushes());
        assert!(SyncMode::CloudNativeFirst.push_first());
        assert!(!SyncMode::CloudCloudFirst.push_first());
        assert!(SyncMode::default().pulls() && SyncMode::default().pushes());
    }

    #[test]
    fn channel_callback_delivers() {
        let (mut request, rx) = SyncRequest::new(1, props(), ["t"]).with_channel();
        let callback = request.take_callback().unwrap();
        callback(SyncOutcome {
            request_id: 9,
            result: Err(SyncError::Cancelled),
        });
        assert_eq!(rx.recv().unwrap().request_id, 9);
    }
}

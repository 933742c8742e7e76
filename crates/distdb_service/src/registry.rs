//! Per-process sync sessions.
//!
//! A session binds one client process to one store: it holds a storage
//! connection for as long as the process uses the store and carries an idle
//! timer that evicts it after [`RegistryConfig::idle_timeout`] without use.
//!
//! Sessions are keyed by pid, then store id. Every change to a process's
//! map runs under that pid's entry, so a timer cannot act on a session that
//! was already replaced or torn down. Stores are opened and released
//! outside the entry: an open in flight holds a reserved slot, and a
//! process that dies meanwhile starts a new epoch, so the late session is
//! dropped instead of resurrected.

use crate::config::RegistryConfig;
use crate::context::ProcessContext;
use crate::error::{ServiceError, ServiceResult};
use dashmap::DashMap;
use distdb_storage::{
    Connection, SharedStore, StorageError, StoreCache, StoreIdentity, StoreProperties,
};
use distdb_sync::{ExecutorPool, SyncError, TaskId};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One process's use of one store.
pub struct SyncerSession {
    ctx: ProcessContext,
    store_id: String,
    properties: StoreProperties,
    connection: Mutex<Option<Connection>>,
    timer: Mutex<Option<TaskId>>,
    // Bumped on every re-arm; a timer only evicts the generation it armed.
    generation: AtomicU64,
    distributed_tables: Mutex<BTreeSet<String>>,
}

impl SyncerSession {
    fn new(ctx: ProcessContext, properties: StoreProperties, connection: Connection) -> Self {
        Self {
            ctx,
            store_id: properties.identity.store_id.clone(),
            properties,
            connection: Mutex::new(Some(connection)),
            timer: Mutex::new(None),
            generation: AtomicU64::new(0),
            distributed_tables: Mutex::new(BTreeSet::new()),
        }
    }

    /// Owning process.
    pub fn pid(&self) -> u32 {
        self.ctx.pid
    }

    /// Context the session was created with.
    pub fn context(&self) -> &ProcessContext {
        &self.ctx
    }

    /// Store id.
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Store identity.
    pub fn identity(&self) -> &StoreIdentity {
        &self.properties.identity
    }

    /// Properties the store was opened with.
    pub fn properties(&self) -> &StoreProperties {
        &self.properties
    }

    /// The bound store, unless the session was released.
    pub fn store(&self) -> Option<SharedStore> {
        self.connection.lock().as_ref().map(Connection::store)
    }

    /// True once the session gave up its connection.
    pub fn is_released(&self) -> bool {
        self.connection.lock().is_none()
    }

    /// Marks `tables` as synchronized with peers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty name, a storage error if a
    /// table does not exist or the session was released.
    pub fn set_distributed_tables(&self, tables: &[String]) -> ServiceResult<()> {
        {
            let connection = self.connection.lock();
            let connection = connection.as_ref().ok_or(StorageError::Closed)?;
            for table in tables {
                if table.is_empty() {
                    return Err(ServiceError::invalid_argument("empty table name"));
                }
                connection.schema(table)?;
            }
        }
        *self.distributed_tables.lock() = tables.iter().cloned().collect();
        debug!(
            store = %self.identity().anonymous(),
            tables = tables.len(),
            "distributed tables set"
        );
        Ok(())
    }

    /// Tables marked distributed, in name order.
    pub fn distributed_tables(&self) -> Vec<String> {
        self.distributed_tables.lock().iter().cloned().collect()
    }

    fn release(&self) {
        let connection = self.connection.lock().take();
        drop(connection);
    }
}

impl fmt::Debug for SyncerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncerSession")
            .field("pid", &self.ctx.pid)
            .field("store", &self.identity().anonymous())
            .field("released", &self.is_released())
            .finish()
    }
}

struct ProcessSessions {
    live: HashMap<String, Arc<SyncerSession>>,
    // Opens running outside the entry; they count against the caps.
    opening: usize,
    epoch: u64,
}

impl ProcessSessions {
    fn new(epoch: u64) -> Self {
        Self {
            live: HashMap::new(),
            opening: 0,
            epoch,
        }
    }

    fn is_empty(&self) -> bool {
        self.live.is_empty() && self.opening == 0
    }
}

struct RegistryInner {
    config: RegistryConfig,
    stores: Arc<StoreCache>,
    executor: ExecutorPool,
    sessions: DashMap<u32, ProcessSessions>,
    total: AtomicUsize,
    next_epoch: AtomicU64,
}

/// Registry of sync sessions with per-process and global caps.
#[derive(Clone)]
pub struct SyncerRegistry {
    inner: Arc<RegistryInner>,
}

impl SyncerRegistry {
    /// Creates a registry opening stores through `stores` and running idle
    /// timers on `executor`.
    pub fn new(config: RegistryConfig, stores: Arc<StoreCache>, executor: ExecutorPool) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                stores,
                executor,
                sessions: DashMap::new(),
                total: AtomicUsize::new(0),
                next_epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the session of `ctx.pid` for the store in `properties`,
    /// creating it if needed, and re-arms its idle timer.
    ///
    /// An existing session is replaced when `properties` carries a password
    /// for an encrypted store.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` when a cap is reached (existing sessions
    /// are kept), the storage error if the store cannot be opened, or
    /// `Cancelled` if the process died while its store was opening.
    pub fn get_or_create(
        &self,
        ctx: &ProcessContext,
        properties: StoreProperties,
    ) -> ServiceResult<Arc<SyncerSession>> {
        let inner = &self.inner;
        let (reserved, replaced) = {
            let mut sessions = inner
                .sessions
                .entry(ctx.pid)
                .or_insert_with(|| inner.new_process());
            let store_id = &properties.identity.store_id;
            let mut replaced = None;
            if let Some(existing) = sessions.live.get(store_id).cloned() {
                if !properties.has_password() {
                    inner.arm(&existing);
                    return Ok(existing);
                }
                debug!(
                    pid = ctx.pid,
                    store = %existing.identity().anonymous(),
                    "credentials changed, recreating session"
                );
                sessions.live.remove(store_id);
                inner.retire(&existing);
                replaced = Some(existing);
            }
            (inner.reserve(ctx.pid, &mut sessions), replaced)
        };
        if let Some(old) = replaced {
            old.release();
        }
        let result = reserved.and_then(|epoch| inner.open(ctx, properties, epoch));
        if result.is_err() {
            inner.sessions.remove_if(&ctx.pid, |_, sessions| sessions.is_empty());
        }
        result
    }

    /// The session of `pid` for `store_id`, without re-arming it.
    pub fn get(&self, pid: u32, store_id: &str) -> Option<Arc<SyncerSession>> {
        self.inner
            .sessions
            .get(&pid)
            .and_then(|sessions| sessions.live.get(store_id).cloned())
    }

    /// Drops one session. Returns true if it existed.
    pub fn remove(&self, pid: u32, store_id: &str) -> bool {
        let inner = &self.inner;
        let mut removed = None;
        inner.sessions.remove_if_mut(&pid, |_, sessions| {
            removed = sessions.live.remove(store_id);
            if let Some(session) = &removed {
                inner.retire(session);
            }
            sessions.is_empty()
        });
        match removed {
            Some(session) => {
                session.release();
                true
            }
            None => false,
        }
    }

    /// Tears down every session of a dead process. The sessions leave the
    /// map in one step, so no new call can see them. Their connections are
    /// released and idle timers unregistered before this returns. Opens
    /// still in flight for `pid` are discarded when they finish. Returns
    /// the number of sessions removed.
    pub fn on_process_died(&self, pid: u32) -> usize {
        let inner = &self.inner;
        let mut drained = Vec::new();
        inner.sessions.remove_if_mut(&pid, |_, sessions| {
            for (_, session) in sessions.live.drain() {
                inner.retire(&session);
                drained.push(session);
            }
            true
        });
        for session in &drained {
            session.release();
        }
        info!(pid, removed = drained.len(), "process sessions removed");
        drained.len()
    }

    /// Sessions across all processes.
    pub fn session_count(&self) -> usize {
        self.inner.total.load(Ordering::Acquire)
    }

    /// Sessions held by `pid`.
    pub fn process_session_count(&self, pid: u32) -> usize {
        self.inner
            .sessions
            .get(&pid)
            .map_or(0, |sessions| sessions.live.len())
    }

    /// Processes holding at least one session.
    pub fn process_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Removes every session of every process.
    pub fn clear(&self) {
        let pids: Vec<u32> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        for pid in pids {
            self.on_process_died(pid);
        }
    }
}

impl RegistryInner {
    fn new_process(&self) -> ProcessSessions {
        ProcessSessions::new(self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Takes a per-process and a global slot for an open about to run.
    /// Returns the epoch the open belongs to.
    fn reserve(&self, pid: u32, sessions: &mut ProcessSessions) -> ServiceResult<u64> {
        let held = sessions.live.len() + sessions.opening;
        if held >= self.config.max_sessions_per_process {
            warn!(pid, held, "process session cap reached");
            return Err(ServiceError::resource_exhausted(format!(
                "process {pid} already holds {held} sessions"
            )));
        }
        let max = self.config.max_sessions;
        if self
            .total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .is_err()
        {
            warn!(pid, max, "global session cap reached");
            return Err(ServiceError::resource_exhausted(format!(
                "{max} sessions in use"
            )));
        }
        sessions.opening += 1;
        Ok(sessions.epoch)
    }

    /// Opens the store outside the pid's entry, then installs the session
    /// if the process is still the one that reserved the slot.
    fn open(
        self: &Arc<Self>,
        ctx: &ProcessContext,
        properties: StoreProperties,
        epoch: u64,
    ) -> ServiceResult<Arc<SyncerSession>> {
        let opened = self.stores.acquire(&properties);
        let Some(mut sessions) = self
            .sessions
            .get_mut(&ctx.pid)
            .filter(|sessions| sessions.epoch == epoch)
        else {
            self.total.fetch_sub(1, Ordering::AcqRel);
            drop(opened);
            debug!(pid = ctx.pid, "process died while its store was opening");
            return Err(SyncError::Cancelled.into());
        };
        sessions.opening -= 1;
        let connection = match opened {
            Ok(connection) => connection,
            Err(e) => {
                drop(sessions);
                self.total.fetch_sub(1, Ordering::AcqRel);
                return Err(e.into());
            }
        };
        let store_id = properties.identity.store_id.clone();
        if let Some(winner) = sessions.live.get(&store_id).cloned() {
            // A concurrent call opened the same store first.
            self.arm(&winner);
            drop(sessions);
            self.total.fetch_sub(1, Ordering::AcqRel);
            drop(connection);
            return Ok(winner);
        }
        let session = Arc::new(SyncerSession::new(*ctx, properties, connection));
        self.arm(&session);
        sessions.live.insert(store_id, Arc::clone(&session));
        drop(sessions);
        info!(pid = ctx.pid, store = %session.identity().anonymous(), "session created");
        Ok(session)
    }

    /// Replaces the session's idle timer. Called under the pid's entry.
    fn arm(self: &Arc<Self>, session: &Arc<SyncerSession>) {
        let generation = session.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let registry = Arc::downgrade(self);
        let target = Arc::downgrade(session);
        let id = self.executor.schedule(self.config.idle_timeout, move || {
            if let (Some(registry), Some(session)) = (registry.upgrade(), target.upgrade()) {
                registry.expire(&session, generation);
            }
        });
        if let Some(old) = session.timer.lock().replace(id) {
            self.executor.remove(old);
        }
    }

    /// Unregisters the timer and frees the slot of a session that was just
    /// removed from its map. Called under the pid's entry; the caller
    /// releases the connection once the entry is dropped, since closing the
    /// engine runs close notifiers.
    fn retire(&self, session: &SyncerSession) {
        session.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(id) = session.timer.lock().take() {
            self.executor.remove(id);
        }
        self.total.fetch_sub(1, Ordering::AcqRel);
    }

    fn expire(&self, session: &Arc<SyncerSession>, generation: u64) {
        let pid = session.pid();
        let mut evicted = false;
        self.sessions.remove_if_mut(&pid, |_, sessions| {
            let current = sessions
                .live
                .get(&session.store_id)
                .is_some_and(|s| Arc::ptr_eq(s, session));
            if current && session.generation.load(Ordering::Acquire) == generation {
                sessions.live.remove(&session.store_id);
                self.retire(session);
                evicted = true;
            }
            sessions.is_empty()
        });
        if evicted {
            session.release();
            info!(pid, store = %session.identity().anonymous(), "idle session evicted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distdb_codec::{FieldInfo, StorageType};
    use distdb_storage::{
        CipherType, EngineOpener, InMemoryOpener, LifecycleState, StorageEngine, StorageResult,
    };
    use distdb_sync::PoolConfig;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    /// Opens store "slow" only once the test lets it through.
    struct GatedOpener {
        inner: InMemoryOpener,
        started: Mutex<mpsc::Sender<()>>,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl EngineOpener for GatedOpener {
        fn open(&self, properties: &StoreProperties) -> StorageResult<Arc<dyn StorageEngine>> {
            if properties.identity.store_id == "slow" {
                let _ = self.started.lock().send(());
                if self.gate.lock().recv_timeout(WAIT).is_err() {
                    return Err(StorageError::engine_init("gate never opened"));
                }
            }
            self.inner.open(properties)
        }
    }

    fn gated_registry(
        config: RegistryConfig,
    ) -> (SyncerRegistry, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let opener = Arc::new(GatedOpener {
            inner: InMemoryOpener::new(),
            started: Mutex::new(started_tx),
            gate: Mutex::new(gate_rx),
        });
        let stores = Arc::new(StoreCache::new(opener));
        let executor = ExecutorPool::new(PoolConfig::default().with_workers(2)).unwrap();
        (SyncerRegistry::new(config, stores, executor), started_rx, gate_tx)
    }

    fn open_in_background(
        registry: &SyncerRegistry,
        pid: u32,
        store: &str,
    ) -> mpsc::Receiver<ServiceResult<Arc<SyncerSession>>> {
        let (tx, rx) = mpsc::channel();
        let registry = registry.clone();
        let properties = props(store);
        thread::spawn(move || {
            let _ = tx.send(registry.get_or_create(&ctx(pid), properties));
        });
        rx
    }

    fn registry(config: RegistryConfig) -> (SyncerRegistry, Arc<InMemoryOpener>, ExecutorPool) {
        let opener = Arc::new(InMemoryOpener::new());
        let stores = Arc::new(StoreCache::new(opener.clone()));
        let executor = ExecutorPool::new(PoolConfig::default().with_workers(2)).unwrap();
        (SyncerRegistry::new(config, stores, executor.clone()), opener, executor)
    }

    fn ctx(pid: u32) -> ProcessContext {
        ProcessContext::new(pid, 1000 + pid, 500 + pid, 100)
    }

    fn props(store: &str) -> StoreProperties {
        StoreProperties::new(
            StoreIdentity::new("100", "com.example.notes", store),
            format!("/data/{store}"),
        )
    }

    #[test]
    fn same_store_reuses_session() {
        let (registry, opener, executor) = registry(RegistryConfig::default());
        let first = registry.get_or_create(&ctx(1), props("a")).unwrap();
        let second = registry.get_or_create(&ctx(1), props("a")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.session_count(), 1);
        assert_eq!(opener.opened(), 1);
        // Re-arming replaced the timer instead of adding one.
        assert_eq!(executor.pending(), 1);
    }

    #[test]
    fn per_process_cap_keeps_existing() {
        let config = RegistryConfig::default().with_max_sessions_per_process(2);
        let (registry, _, _) = registry(config);
        let a = registry.get_or_create(&ctx(1), props("a")).unwrap();
        registry.get_or_create(&ctx(1), props("b")).unwrap();
        let err = registry.get_or_create(&ctx(1), props("c")).unwrap_err();
        assert!(matches!(err, ServiceError::ResourceExhausted { .. }));
        assert_eq!(registry.process_session_count(1), 2);
        assert!(!a.is_released());
        // Other processes are unaffected.
        registry.get_or_create(&ctx(2), props("c")).unwrap();
    }

    #[test]
    fn global_cap_spans_processes() {
        let config = RegistryConfig::default().with_max_sessions(2);
        let (registry, _, _) = registry(config);
        registry.get_or_create(&ctx(1), props("a")).unwrap();
        registry.get_or_create(&ctx(2), props("a")).unwrap();
        let err = registry.get_or_create(&ctx(3), props("a")).unwrap_err();
        assert!(matches!(err, ServiceError::ResourceExhausted { .. }));
        assert_eq!(registry.process_count(), 2);
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn password_recreates_session() {
        let (registry, _, _) = registry(RegistryConfig::default());
        let encrypted = props("a").with_encryption(CipherType::Aes256Gcm, b"pw1".to_vec());
        let first = registry.get_or_create(&ctx(1), encrypted.clone()).unwrap();
        let second = registry.get_or_create(&ctx(1), encrypted).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.is_released());
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn idle_session_is_evicted() {
        let config = RegistryConfig::default().with_idle_timeout(Duration::from_millis(30));
        let (registry, _, executor) = registry(config);
        let session = registry.get_or_create(&ctx(1), props("a")).unwrap();
        let (tx, rx) = mpsc::channel();
        session
            .store()
            .unwrap()
            .register_close_notifier(move || {
                let _ = tx.send(());
            })
            .unwrap();
        drop(session);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(registry.get(1, "a").is_none());
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.process_count(), 0);
        assert_eq!(executor.pending(), 0);
    }

    #[test]
    fn process_death_releases_everything() {
        let (registry, _, executor) = registry(RegistryConfig::default());
        let a = registry.get_or_create(&ctx(1), props("a")).unwrap();
        let b = registry.get_or_create(&ctx(1), props("b")).unwrap();
        registry.get_or_create(&ctx(2), props("a")).unwrap();
        let store_b = b.store().unwrap();

        assert_eq!(registry.on_process_died(1), 2);
        assert!(a.is_released() && b.is_released());
        assert_eq!(store_b.state(), LifecycleState::Closed);
        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.process_session_count(1), 0);
        assert_eq!(executor.pending(), 1);
        assert_eq!(registry.on_process_died(1), 0);
    }

    #[test]
    fn open_failure_leaves_no_trace() {
        let (registry, opener, _) = registry(RegistryConfig::default());
        opener.fail_next(1);
        assert!(registry.get_or_create(&ctx(1), props("a")).is_err());
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.process_count(), 0);
    }

    #[test]
    fn distributed_tables_must_exist() {
        let (registry, _, _) = registry(RegistryConfig::default());
        let session = registry.get_or_create(&ctx(1), props("a")).unwrap();
        let tables = vec!["notes".to_string()];
        assert!(session.set_distributed_tables(&tables).is_err());

        let conn = session.store().unwrap().acquire().unwrap();
        conn.create_table("notes", &[FieldInfo::new("body", StorageType::Text)])
            .unwrap();
        session.set_distributed_tables(&tables).unwrap();
        assert_eq!(session.distributed_tables(), tables);
    }

    #[test]
    fn remove_single_session() {
        let (registry, _, _) = registry(RegistryConfig::default());
        registry.get_or_create(&ctx(1), props("a")).unwrap();
        assert!(registry.remove(1, "a"));
        assert!(!registry.remove(1, "a"));
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn slow_open_does_not_block_other_stores() {
        let (registry, started, gate) = gated_registry(RegistryConfig::default());
        let slow = open_in_background(&registry, 1, "slow");
        started.recv_timeout(WAIT).unwrap();

        let fast = open_in_background(&registry, 1, "fast");
        let session = fast.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(session.store_id(), "fast");

        gate.send(()).unwrap();
        let session = slow.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(session.store_id(), "slow");
        assert_eq!(registry.process_session_count(1), 2);
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn open_in_flight_counts_against_cap() {
        let config = RegistryConfig::default().with_max_sessions_per_process(1);
        let (registry, started, gate) = gated_registry(config);
        let slow = open_in_background(&registry, 1, "slow");
        started.recv_timeout(WAIT).unwrap();

        let err = registry.get_or_create(&ctx(1), props("fast")).unwrap_err();
        assert!(matches!(err, ServiceError::ResourceExhausted { .. }));

        gate.send(()).unwrap();
        slow.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn process_death_discards_open_in_flight() {
        let (registry, started, gate) = gated_registry(RegistryConfig::default());
        let slow = open_in_background(&registry, 1, "slow");
        started.recv_timeout(WAIT).unwrap();

        assert_eq!(registry.on_process_died(1), 0);
        gate.send(()).unwrap();
        let err = slow.recv_timeout(WAIT).unwrap().unwrap_err();
        assert!(matches!(err, ServiceError::Sync(SyncError::Cancelled)));
        assert!(registry.get(1, "slow").is_none());
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.process_count(), 0);
    }
}

//! Reference-counted lifecycle of one store's shared engine.
//!
//! ```text
//! Unopened --acquire--> Open(n) --last release--> Closing --notifiers, close--> Closed
//! ```
//!
//! The engine is built on the first [`SharedStore::acquire`] and torn down
//! when the live connection count drops from 1 to 0. Exactly one release
//! observes that transition; it runs the close notifiers once, in
//! registration order, then closes the engine.

use crate::engine::{EngineOpener, ReadQuery, StorageEngine, StoreProperties};
use crate::error::{StorageError, StorageResult};
use crate::identity::StoreIdentity;
use crate::pool::{HandleKind, HandlePool};
use distdb_codec::{FieldInfo, RowWithLog};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Callback run once when the store's engine closes.
pub type CloseNotifier = Box<dyn FnOnce() + Send>;

/// Observable lifecycle state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No engine has been opened yet.
    Unopened,
    /// The engine is open with this many live connections.
    Open(usize),
    /// The last connection was released; notifiers are running.
    Closing,
    /// The engine has been closed. The store cannot be reopened.
    Closed,
}

enum Phase {
    Unopened,
    Open(Arc<dyn StorageEngine>),
    Closing,
    Closed,
}

struct State {
    phase: Phase,
    notifiers: Vec<CloseNotifier>,
}

struct StoreInner {
    properties: StoreProperties,
    opener: Arc<dyn EngineOpener>,
    state: Mutex<State>,
    connections: AtomicIsize,
    pool: HandlePool,
    anon: String,
}

impl StoreInner {
    fn release(&self) {
        let mut state = self.state.lock();
        let prev = self.connections.fetch_sub(1, Ordering::SeqCst);
        if prev <= 0 {
            self.connections.fetch_add(1, Ordering::SeqCst);
            error!(
                store = %self.anon,
                count = prev - 1,
                "connection count went negative, release ignored"
            );
            return;
        }
        if prev > 1 {
            debug!(store = %self.anon, count = prev - 1, "connection released");
            return;
        }

        let engine = match std::mem::replace(&mut state.phase, Phase::Closing) {
            Phase::Open(engine) => engine,
            other => {
                state.phase = other;
                error!(store = %self.anon, "last release on a store that is not open");
                return;
            }
        };
        engine.set_connection_flag(false);
        let notifiers = std::mem::take(&mut state.notifiers);
        drop(state);

        // Notifiers run unlocked so they may inspect the store.
        for notify in notifiers {
            notify();
        }
        engine.close();
        self.state.lock().phase = Phase::Closed;
        info!(store = %self.anon, "engine closed");
    }
}

/// One store's shared engine and its connection count.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<StoreInner>,
}

impl SharedStore {
    /// Creates an unopened store.
    pub fn new(properties: StoreProperties, opener: Arc<dyn EngineOpener>) -> Self {
        let pool = HandlePool::new(properties.pool);
        let anon = properties.identity.anonymous();
        Self {
            inner: Arc::new(StoreInner {
                properties,
                opener,
                state: Mutex::new(State {
                    phase: Phase::Unopened,
                    notifiers: Vec::new(),
                }),
                connections: AtomicIsize::new(0),
                pool,
                anon,
            }),
        }
    }

    /// Returns a new connection, opening the engine if needed.
    ///
    /// # Errors
    ///
    /// Propagates the opener's error if the engine cannot be built (the
    /// store stays unopened). Returns `Stale` while the store is closing
    /// and `Closed` once it has closed.
    pub fn acquire(&self) -> StorageResult<Connection> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if matches!(state.phase, Phase::Unopened) {
            let engine = inner.opener.open(&inner.properties).map_err(|e| {
                warn!(store = %inner.anon, error = %e, "engine open failed");
                e
            })?;
            info!(store = %inner.anon, "engine opened");
            state.phase = Phase::Open(engine);
        }
        let engine = match &state.phase {
            Phase::Open(engine) => Arc::clone(engine),
            Phase::Closing => return Err(StorageError::Stale),
            Phase::Unopened | Phase::Closed => return Err(StorageError::Closed),
        };
        let count = inner.connections.fetch_add(1, Ordering::SeqCst) + 1;
        engine.set_connection_flag(true);
        drop(state);
        debug!(store = %inner.anon, count, "connection acquired");
        Ok(Connection {
            store: Arc::clone(inner),
            engine,
        })
    }

    /// Adds a callback to run when the engine closes.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the final release has already happened.
    pub fn register_close_notifier<F>(&self, notifier: F) -> StorageResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if matches!(state.phase, Phase::Closing | Phase::Closed) {
            return Err(StorageError::Closed);
        }
        state.notifiers.push(Box::new(notifier));
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        let state = self.inner.state.lock();
        match state.phase {
            Phase::Unopened => LifecycleState::Unopened,
            Phase::Open(_) => LifecycleState::Open(self.connection_count()),
            Phase::Closing => LifecycleState::Closing,
            Phase::Closed => LifecycleState::Closed,
        }
    }

    /// Live connection count.
    pub fn connection_count(&self) -> usize {
        usize::try_from(self.inner.connections.load(Ordering::SeqCst)).unwrap_or(0)
    }

    /// Store identity.
    pub fn identity(&self) -> &StoreIdentity {
        &self.inner.properties.identity
    }

    /// Properties the engine is opened with.
    pub fn properties(&self) -> &StoreProperties {
        &self.inner.properties
    }

    /// Handle pool shared by every connection.
    pub fn pool(&self) -> &HandlePool {
        &self.inner.pool
    }

    /// True if both handles refer to the same store instance.
    pub fn ptr_eq(&self, other: &SharedStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[cfg(test)]
    fn force_release(&self) {
        self.inner.release();
    }
}

impl fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStore")
            .field("store", &self.inner.anon)
            .field("state", &self.state())
            .finish()
    }
}

/// A caller-held reference to a store's engine.
///
/// Dropping the connection releases it; the last release closes the engine.
pub struct Connection {
    store: Arc<StoreInner>,
    engine: Arc<dyn StorageEngine>,
}

impl Connection {
    /// Reads rows through a reader slot.
    ///
    /// # Errors
    ///
    /// Returns `Busy` if every reader slot is taken, or the engine's error.
    pub fn read(&self, table: &str, query: &ReadQuery) -> StorageResult<Vec<RowWithLog>> {
        let _slot = self.store.pool.acquire(HandleKind::Reader)?;
        self.engine.read(table, query)
    }

    /// Applies rows through the writer slot.
    ///
    /// # Errors
    ///
    /// Returns `Busy` if the writer slot is taken, or the engine's error.
    pub fn write(&self, table: &str, rows: &[RowWithLog]) -> StorageResult<usize> {
        let _slot = self.store.pool.acquire(HandleKind::Writer)?;
        self.engine.write(table, rows)
    }

    /// Creates or checks a table through the writer slot.
    ///
    /// # Errors
    ///
    /// See [`StorageEngine::create_table`].
    pub fn create_table(&self, table: &str, fields: &[FieldInfo]) -> StorageResult<()> {
        let _slot = self.store.pool.acquire(HandleKind::Writer)?;
        self.engine.create_table(table, fields)
    }

    /// Field list of `table`.
    ///
    /// # Errors
    ///
    /// See [`StorageEngine::schema`].
    pub fn schema(&self, table: &str) -> StorageResult<Vec<FieldInfo>> {
        let _slot = self.store.pool.acquire(HandleKind::Reader)?;
        self.engine.schema(table)
    }

    /// Store identity.
    pub fn identity(&self) -> &StoreIdentity {
        &self.store.properties.identity
    }

    /// The store this connection belongs to.
    pub fn store(&self) -> SharedStore {
        SharedStore {
            inner: Arc::clone(&self.store),
        }
    }

    /// Releases the connection. Same as dropping it.
    pub fn close(self) {}
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.store.release();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("store", &self.store.anon)
            .finish()
    }
}

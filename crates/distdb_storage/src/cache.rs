//! Process-wide cache of open stores.

use crate::engine::{EngineOpener, StoreProperties};
use crate::error::{StorageError, StorageResult};
use crate::identity::StoreIdentity;
use crate::store::{Connection, LifecycleState, SharedStore};
use dashmap::DashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Retry settings for [`StoreCache::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCacheConfig {
    /// Attempts before giving up on a store that keeps closing under us.
    pub open_retries: u32,
    /// Pause between attempts.
    pub stale_retry_interval: Duration,
}

impl Default for StoreCacheConfig {
    fn default() -> Self {
        Self {
            open_retries: 3,
            stale_retry_interval: Duration::from_millis(30),
        }
    }
}

impl StoreCacheConfig {
    /// Sets the attempt count.
    pub fn with_open_retries(mut self, open_retries: u32) -> Self {
        self.open_retries = open_retries;
        self
    }

    /// Sets the pause between attempts.
    pub fn with_stale_retry_interval(mut self, interval: Duration) -> Self {
        self.stale_retry_interval = interval;
        self
    }
}

/// Maps store identifiers to their [`SharedStore`].
///
/// Every caller asking for the same identity shares one engine. A store
/// that has fully closed is replaced by a fresh one on the next acquire.
pub struct StoreCache {
    opener: Arc<dyn EngineOpener>,
    stores: DashMap<String, SharedStore>,
    config: StoreCacheConfig,
}

impl StoreCache {
    /// Creates an empty cache.
    pub fn new(opener: Arc<dyn EngineOpener>) -> Self {
        Self::with_config(opener, StoreCacheConfig::default())
    }

    /// Creates an empty cache with explicit retry settings.
    pub fn with_config(opener: Arc<dyn EngineOpener>, config: StoreCacheConfig) -> Self {
        Self {
            opener,
            stores: DashMap::new(),
            config,
        }
    }

    /// Returns a connection to the store described by `properties`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an incomplete identity, the opener's
    /// error if the engine cannot be built, or `Stale` if the store was
    /// still closing after every retry.
    pub fn acquire(&self, properties: &StoreProperties) -> StorageResult<Connection> {
        properties.identity.validate()?;
        let key = properties.identity.identifier_hex();
        let attempts = self.config.open_retries.max(1);
        for attempt in 1..=attempts {
            let store = self
                .stores
                .entry(key.clone())
                .or_insert_with(|| SharedStore::new(properties.clone(), Arc::clone(&self.opener)))
                .clone();
            match store.acquire() {
                Ok(conn) => return Ok(conn),
                Err(StorageError::Closed) => {
                    self.stores.remove_if(&key, |_, cached| cached.ptr_eq(&store));
                }
                Err(StorageError::Stale) => {
                    debug!(
                        store = %properties.identity.anonymous(),
                        attempt,
                        "store closing, retrying open"
                    );
                    if attempt < attempts {
                        thread::sleep(self.config.stale_retry_interval);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Stale)
    }

    /// The cached store for `identity`, if any.
    pub fn get(&self, identity: &StoreIdentity) -> Option<SharedStore> {
        self.stores
            .get(&identity.identifier_hex())
            .map(|s| s.value().clone())
    }

    /// Drops cached stores that have closed. Returns how many were removed.
    pub fn purge_closed(&self) -> usize {
        let before = self.stores.len();
        self.stores
            .retain(|_, store| store.state() != LifecycleState::Closed);
        before - self.stores.len()
    }

    /// Number of cached stores.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// True if no store is cached.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryOpener;
    use std::sync::mpsc;

    fn props(store: &str) -> StoreProperties {
        StoreProperties::new(StoreIdentity::new("u", "app", store), format!("/data/{store}"))
    }

    #[test]
    fn same_identity_shares_engine() {
        let opener = Arc::new(InMemoryOpener::new());
        let cache = StoreCache::new(opener.clone());
        let a = cache.acquire(&props("s")).unwrap();
        let b = cache.acquire(&props("s")).unwrap();
        assert!(a.store().ptr_eq(&b.store()));
        assert_eq!(opener.opened(), 1);
        let _c = cache.acquire(&props("t")).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn closed_store_is_replaced() {
        let opener = Arc::new(InMemoryOpener::new());
        let cache = StoreCache::new(opener.clone());
        let first = cache.acquire(&props("s")).unwrap();
        let old = first.store();
        drop(first);
        assert_eq!(old.state(), LifecycleState::Closed);

        let again = cache.acquire(&props("s")).unwrap();
        assert!(!again.store().ptr_eq(&old));
        assert_eq!(opener.opened(), 2);
    }

    #[test]
    fn closing_store_reports_stale_then_reopens() {
        let config = StoreCacheConfig::default()
            .with_open_retries(2)
            .with_stale_retry_interval(Duration::from_millis(1));
        let cache = StoreCache::with_config(Arc::new(InMemoryOpener::new()), config);
        let conn = cache.acquire(&props("s")).unwrap();
        let store = conn.store();

        // Hold the store in Closing until the racing acquire has finished.
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        store
            .register_close_notifier(move || {
                entered_tx.send(()).unwrap();
                release_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            })
            .unwrap();

        let closer = thread::spawn(move || drop(conn));
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(store.state(), LifecycleState::Closing);
        assert_eq!(cache.acquire(&props("s")).unwrap_err(), StorageError::Stale);
        release_tx.send(()).unwrap();
        closer.join().unwrap();

        let fresh = cache.acquire(&props("s")).unwrap();
        assert!(!fresh.store().ptr_eq(&store));
    }

    #[test]
    fn incomplete_identity_rejected() {
        let cache = StoreCache::new(Arc::new(InMemoryOpener::new()));
        let bad = StoreProperties::new(StoreIdentity::new("u", "", "s"), "/x");
        assert!(matches!(
            cache.acquire(&bad),
            Err(StorageError::InvalidArgument { .. })
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_drops_closed() {
        let cache = StoreCache::new(Arc::new(InMemoryOpener::new()));
        drop(cache.acquire(&props("s")).unwrap());
        let _live = cache.acquire(&props("t")).unwrap();
        assert_eq!(cache.purge_closed(), 1);
        assert!(cache.get(&StoreIdentity::new("u", "app", "t")).is_some());
    }
}

//! Process-wide publish/subscribe for service lifecycle events.
//!
//! Delivery is asynchronous: channel subscribers receive a clone of every
//! matching event, handler subscribers run on the executor pool. Posting
//! never waits for a subscriber.

use distdb_storage::StoreProperties;
use distdb_sync::{ExecutorPool, SyncMode};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::debug;

/// Kind of an [`Event`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The data feature was initialized by a caller.
    FeatureInit,
    /// A caller registered a store schema.
    GetSchema,
    /// A cloud sync should run.
    CloudSyncTriggered,
}

/// Store a schema event refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaInfo {
    /// Caller token.
    pub token: u32,
    /// Owning bundle.
    pub bundle_name: String,
    /// Store id.
    pub store_id: String,
    /// App clone index.
    pub instance_id: i32,
    /// Registered schema version.
    pub schema_version: i32,
}

/// A cloud sync to run on behalf of the service.
#[derive(Debug, Clone)]
pub struct CloudSyncEvent {
    /// Account the sync runs as.
    pub user: u32,
    /// Store to sync.
    pub properties: StoreProperties,
    /// Tables to sync.
    pub tables: Vec<String>,
    /// Direction.
    pub mode: SyncMode,
}

/// A lifecycle event.
#[derive(Debug, Clone)]
pub enum Event {
    /// Posted by [`crate::DataService::on_initialize`].
    FeatureInit {
        /// Caller token.
        token: u32,
    },
    /// Posted after a schema was registered.
    GetSchema(SchemaInfo),
    /// Asks the service to sync a store with the cloud.
    CloudSyncTriggered(CloudSyncEvent),
}

impl Event {
    /// Kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::FeatureInit { .. } => EventKind::FeatureInit,
            Event::GetSchema(_) => EventKind::GetSchema,
            Event::CloudSyncTriggered(_) => EventKind::CloudSyncTriggered,
        }
    }
}

type Handler = Arc<dyn Fn(Event) + Send + Sync>;

enum Subscriber {
    Channel(Sender<Event>),
    Handler(Handler),
}

/// Distributes events to subscribers.
pub struct EventCenter {
    executor: ExecutorPool,
    subscribers: RwLock<Vec<(EventKind, Subscriber)>>,
}

impl EventCenter {
    /// Creates an event center dispatching handlers on `executor`.
    pub fn new(executor: ExecutorPool) -> Self {
        Self {
            executor,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to `kind` through a channel.
    pub fn subscribe(&self, kind: EventKind) -> Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push((kind, Subscriber::Channel(tx)));
        rx
    }

    /// Runs `handler` on the executor pool for every `kind` event.
    pub fn subscribe_fn<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .push((kind, Subscriber::Handler(Arc::new(handler))));
    }

    /// Posts `event`. Returns the number of subscribers it was handed to.
    pub fn post(&self, event: Event) -> usize {
        let kind = event.kind();
        let mut delivered = 0;
        // Disconnected channels are pruned as they are found.
        self.subscribers.write().retain(|(k, subscriber)| {
            if *k != kind {
                return true;
            }
            match subscriber {
                Subscriber::Channel(tx) => {
                    let alive = tx.send(event.clone()).is_ok();
                    delivered += usize::from(alive);
                    alive
                }
                Subscriber::Handler(handler) => {
                    let handler = Arc::clone(handler);
                    let event = event.clone();
                    self.executor.execute(move || handler(event));
                    delivered += 1;
                    true
                }
            }
        });
        debug!(?kind, delivered, "event posted");
        delivered
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distdb_sync::PoolConfig;
    use std::time::Duration;

    fn center() -> EventCenter {
        EventCenter::new(ExecutorPool::new(PoolConfig::default().with_workers(1)).unwrap())
    }

    #[test]
    fn channel_receives_matching_kind_only() {
        let events = center();
        let init = events.subscribe(EventKind::FeatureInit);
        let schema = events.subscribe(EventKind::GetSchema);
        assert_eq!(events.post(Event::FeatureInit { token: 7 }), 1);
        assert!(matches!(
            init.recv_timeout(Duration::from_secs(1)).unwrap(),
            Event::FeatureInit { token: 7 }
        ));
        assert!(schema.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_is_pruned() {
        let events = center();
        drop(events.subscribe(EventKind::FeatureInit));
        assert_eq!(events.post(Event::FeatureInit { token: 1 }), 0);
        assert_eq!(events.subscriber_count(), 0);
    }

    #[test]
    fn handler_runs_on_pool() {
        let events = center();
        let (tx, rx) = mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        events.subscribe_fn(EventKind::FeatureInit, move |event| {
            let _ = tx.lock().send((event.kind(), std::thread::current().id()));
        });
        events.post(Event::FeatureInit { token: 1 });
        let (kind, thread) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(kind, EventKind::FeatureInit);
        assert_ne!(thread, std::thread::current().id());
    }
}

//! Per-process completion and change notifications.

use dashmap::DashMap;
use distdb_storage::StoreIdentity;
use distdb_sync::SyncOutcome;
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Callback interface a client process registers with the service.
pub trait SyncNotifier: Send + Sync {
    /// An async sync started with sequence number `seq` finished.
    fn on_complete(&self, seq: u32, outcome: &SyncOutcome);

    /// Rows of `store_id` changed on `devices`.
    fn on_change(&self, store_id: &str, devices: &[String]);
}

/// Maps processes to their notifiers and store identifiers to the process
/// subscribed to them.
#[derive(Default)]
pub struct NotifierRegistry {
    notifiers: DashMap<u32, Arc<dyn SyncNotifier>>,
    identifiers: DashMap<String, u32>,
}

impl NotifierRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `notifier` for `pid`, replacing any previous one.
    pub fn register(&self, pid: u32, notifier: Arc<dyn SyncNotifier>) {
        self.notifiers.insert(pid, notifier);
        info!(pid, "notifier registered");
    }

    /// Routes change notifications for `identity` to `pid`.
    pub fn subscribe(&self, identity: &StoreIdentity, pid: u32) {
        debug!(store = %identity.anonymous(), pid, "subscribed");
        self.identifiers.insert(identity.identifier_hex(), pid);
    }

    /// Stops routing change notifications for `identity`.
    pub fn unsubscribe(&self, identity: &StoreIdentity) {
        self.identifiers.remove(&identity.identifier_hex());
    }

    /// Process subscribed to `identity`, if any.
    pub fn subscriber(&self, identity: &StoreIdentity) -> Option<u32> {
        self.identifiers
            .get(&identity.identifier_hex())
            .map(|pid| *pid)
    }

    /// Delivers an async sync result to `pid`. Returns false if `pid` has
    /// no notifier.
    pub fn notify_complete(&self, pid: u32, seq: u32, outcome: &SyncOutcome) -> bool {
        let Some(notifier) = self.notifier(pid) else {
            warn!(pid, seq, "no notifier for completed sync");
            return false;
        };
        notifier.on_complete(seq, outcome);
        true
    }

    /// Reports that `device` changed rows of `identity`.
    ///
    /// A `pid` of 0 means the change came from a peer; the process is then
    /// looked up through the subscriptions. Returns false if nobody was
    /// notified.
    pub fn on_data_change(&self, pid: u32, identity: &StoreIdentity, device: &str) -> bool {
        let pid = if pid == 0 {
            match self.subscriber(identity) {
                Some(pid) => pid,
                None => {
                    debug!(store = %identity.anonymous(), "change has no subscriber");
                    return false;
                }
            }
        } else {
            pid
        };
        let Some(notifier) = self.notifier(pid) else {
            return false;
        };
        notifier.on_change(&identity.store_id, &[device.to_string()]);
        true
    }

    /// Drops the notifier and subscriptions of `pid`.
    pub fn remove_process(&self, pid: u32) {
        self.notifiers.remove(&pid);
        self.identifiers.retain(|_, owner| *owner != pid);
    }

    /// Number of registered notifiers.
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    /// True if no notifier is registered.
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    // Cloned out so no map lock is held while the notifier runs.
    fn notifier(&self, pid: u32) -> Option<Arc<dyn SyncNotifier>> {
        self.notifiers.get(&pid).map(|n| Arc::clone(&n))
    }
}

/// A [`SyncNotifier`] forwarding into channels.
#[derive(Debug)]
pub struct ChannelNotifier {
    complete: Mutex<Sender<(u32, SyncOutcome)>>,
    change: Mutex<Sender<(String, Vec<String>)>>,
}

/// Receiving ends of a [`ChannelNotifier`].
pub type NotifierReceivers = (
    Receiver<(u32, SyncOutcome)>,
    Receiver<(String, Vec<String>)>,
);

impl ChannelNotifier {
    /// Creates a notifier and the receivers of its two streams.
    pub fn new() -> (Self, NotifierReceivers) {
        let (complete_tx, complete_rx) = mpsc::channel();
        let (change_tx, change_rx) = mpsc::channel();
        (
            Self {
                complete: Mutex::new(complete_tx),
                change: Mutex::new(change_tx),
            },
            (complete_rx, change_rx),
        )
    }
}

impl SyncNotifier for ChannelNotifier {
    fn on_complete(&self, seq: u32, outcome: &SyncOutcome) {
        let _ = self.complete.lock().send((seq, outcome.clone()));
    }

    fn on_change(&self, store_id: &str, devices: &[String]) {
        let _ = self
            .change
            .lock()
            .send((store_id.to_string(), devices.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distdb_sync::SyncSummary;

    fn identity() -> StoreIdentity {
        StoreIdentity::new("100", "com.example", "notes")
    }

    #[test]
    fn pid_zero_resolves_through_subscription() {
        let registry = NotifierRegistry::new();
        let (notifier, (_, changes)) = ChannelNotifier::new();
        registry.register(7, Arc::new(notifier));
        assert!(!registry.on_data_change(0, &identity(), "peer"));

        registry.subscribe(&identity(), 7);
        assert!(registry.on_data_change(0, &identity(), "peer"));
        assert_eq!(
            changes.try_recv().unwrap(),
            ("notes".to_string(), vec!["peer".to_string()])
        );

        registry.unsubscribe(&identity());
        assert!(!registry.on_data_change(0, &identity(), "peer"));
    }

    #[test]
    fn completion_reaches_process() {
        let registry = NotifierRegistry::new();
        let (notifier, (complete, _)) = ChannelNotifier::new();
        registry.register(3, Arc::new(notifier));
        let outcome = SyncOutcome {
            request_id: 1,
            result: Ok(SyncSummary::default()),
        };
        assert!(registry.notify_complete(3, 11, &outcome));
        assert!(!registry.notify_complete(4, 11, &outcome));
        assert_eq!(complete.try_recv().unwrap(), (11, outcome));
    }

    #[test]
    fn process_removal_clears_subscriptions() {
        let registry = NotifierRegistry::new();
        let (notifier, _rx) = ChannelNotifier::new();
        registry.register(5, Arc::new(notifier));
        registry.subscribe(&identity(), 5);
        registry.remove_process(5);
        assert!(registry.is_empty());
        assert_eq!(registry.subscriber(&identity()), None);
    }
}

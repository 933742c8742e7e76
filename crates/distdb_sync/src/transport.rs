//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use distdb_codec::{transform_data_items, transform_table_data, DataItem, FieldInfo};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Encoded rows of one table, tagged with the schema they were encoded
/// under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableBatch {
    /// Store identifier (hex).
    pub store: String,
    /// Table name.
    pub table: String,
    /// Field list the items were encoded with.
    pub fields: Vec<FieldInfo>,
    /// Encoded rows.
    pub items: Vec<DataItem>,
}

/// Moves encoded rows between this device and a peer or the cloud.
///
/// The wire format of the exchange is left to implementations.
pub trait SyncTransport: Send + Sync {
    /// Sends a batch. Returns how many items the remote accepted.
    fn push(&self, batch: &TableBatch) -> SyncResult<usize>;

    /// Fetches rows of `table` changed after `since`.
    fn pull(&self, store: &str, table: &str, since: u64) -> SyncResult<TableBatch>;

    /// Checks if the transport can reach the remote.
    fn is_connected(&self) -> bool;
}

/// A mock transport for testing.
///
/// Failures queued with [`fail_next`](Self::fail_next) are returned by the
/// following calls in order; [`fail_always`](Self::fail_always) fails every
/// call.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    calls: AtomicUsize,
    failures: Mutex<VecDeque<SyncError>>,
    always: Mutex<Option<SyncError>>,
    pull_response: Mutex<Option<TableBatch>>,
    pushed: Mutex<Vec<TableBatch>>,
}

impl MockTransport {
    /// Creates a connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            always: Mutex::new(None),
            pull_response: Mutex::new(None),
            pushed: Mutex::new(Vec::new()),
        }
    }

    /// Queues an error for the next call.
    pub fn fail_next(&self, error: SyncError) {
        self.failures.lock().push_back(error);
    }

    /// Fails every call with `error`.
    pub fn fail_always(&self, error: SyncError) {
        *self.always.lock() = Some(error);
    }

    /// Stops failing.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
        *self.always.lock() = None;
    }

    /// Sets the pull response.
    pub fn set_pull_response(&self, response: TableBatch) {
        *self.pull_response.lock() = Some(response);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Batches pushed so far.
    pub fn pushed(&self) -> Vec<TableBatch> {
        self.pushed.lock().clone()
    }

    /// Push and pull calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_connected() {
            return Err(SyncError::network("not connected"));
        }
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        if let Some(err) = self.always.lock().clone() {
            return Err(err);
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for MockTransport {
    fn push(&self, batch: &TableBatch) -> SyncResult<usize> {
        self.check()?;
        self.pushed.lock().push(batch.clone());
        Ok(batch.items.len())
    }

    fn pull(&self, store: &str, table: &str, _since: u64) -> SyncResult<TableBatch> {
        self.check()?;
        Ok(self
            .pull_response
            .lock()
            .clone()
            .unwrap_or_else(|| TableBatch {
                store: store.to_string(),
                table: table.to_string(),
                ..TableBatch::default()
            }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct CloudTable {
    fields: Vec<FieldInfo>,
    items: BTreeMap<Vec<u8>, DataItem>,
}

/// An in-process stand-in for the cloud that several devices share.
///
/// Keeps the newest version of every row (last writer wins by timestamp).
/// When a device pushes under a different schema, stored rows are
/// re-projected onto the new field list.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    tables: Mutex<HashMap<(String, String), CloudTable>>,
}

impl LoopbackTransport {
    /// Creates an empty cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows stored for `table`, tombstones included.
    pub fn row_count(&self, store: &str, table: &str) -> usize {
        self.tables
            .lock()
            .get(&(store.to_string(), table.to_string()))
            .map_or(0, |t| t.items.len())
    }
}

impl SyncTransport for LoopbackTransport {
    fn push(&self, batch: &TableBatch) -> SyncResult<usize> {
        let mut tables = self.tables.lock();
        let table = tables
            .entry((batch.store.clone(), batch.table.clone()))
            .or_default();

        if table.fields != batch.fields {
            if !table.items.is_empty() {
                let stored: Vec<DataItem> = table.items.values().cloned().collect();
                let rows = transform_data_items(&stored, &table.fields, &batch.fields)?;
                let migrated = transform_table_data(&rows, &batch.fields)?;
                table.items = migrated
                    .into_iter()
                    .map(|item| (item.hash_key.clone(), item))
                    .collect();
            }
            table.fields = batch.fields.clone();
        }

        let mut accepted = 0;
        for item in &batch.items {
            let newer = table
                .items
                .get(&item.hash_key)
                .map_or(true, |existing| item.timestamp >= existing.timestamp);
            if newer {
                table.items.insert(item.hash_key.clone(), item.clone());
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    fn pull(&self, store: &str, table: &str, since: u64) -> SyncResult<TableBatch> {
        let tables = self.tables.lock();
        let mut batch = TableBatch {
            store: store.to_string(),
            table: table.to_string(),
            ..TableBatch::default()
        };
        if let Some(t) = tables.get(&(store.to_string(), table.to_string())) {
            batch.fields = t.fields.clone();
            batch.items = t
                .items
                .values()
                .filter(|item| item.timestamp > since)
                .cloned()
                .collect();
        }
        Ok(batch)
    }

    fn is_connected(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distdb_codec::{encode_row, LogInfo, RowWithLog, StorageType, Value};

    fn item(fields: &[FieldInfo], values: Vec<Value>, key: u8, ts: u64) -> DataItem {
        let log = LogInfo {
            timestamp: ts,
            write_timestamp: ts,
            hash_key: vec![key],
            ..LogInfo::default()
        };
        encode_row(&RowWithLog::new(values, log), fields).unwrap()
    }

    #[test]
    fn mock_transport_connection() {
        let transport = MockTransport::new();
        assert!(transport.is_connected());
        transport.set_connected(false);
        assert!(matches!(
            transport.pull("s", "t", 0),
            Err(SyncError::Network { .. })
        ));
    }

    #[test]
    fn mock_transport_failure_queue() {
        let transport = MockTransport::new();
        transport.fail_next(SyncError::busy("locked"));
        assert!(transport.push(&TableBatch::default()).is_err());
        assert!(transport.push(&TableBatch::default()).is_ok());
        transport.fail_always(SyncError::network("down"));
        assert!(transport.pull("s", "t", 0).is_err());
        assert!(transport.pull("s", "t", 0).is_err());
        transport.clear_failures();
        assert!(transport.pull("s", "t", 0).is_ok());
        assert_eq!(transport.calls(), 5);
        assert_eq!(transport.pushed().len(), 1);
    }

    #[test]
    fn loopback_keeps_newest() {
        let cloud = LoopbackTransport::new();
        let fields = vec![FieldInfo::new("n", StorageType::Integer)];
        let batch = |v: i64, ts: u64| TableBatch {
            store: "s".into(),
            table: "t".into(),
            fields: fields.clone(),
            items: vec![item(&fields, vec![Value::Integer(v)], 1, ts)],
        };
        assert_eq!(cloud.push(&batch(1, 5)).unwrap(), 1);
        assert_eq!(cloud.push(&batch(2, 3)).unwrap(), 0);
        let pulled = cloud.pull("s", "t", 0).unwrap();
        assert_eq!(pulled.items[0].timestamp, 5);
        assert!(cloud.pull("s", "t", 5).unwrap().items.is_empty());
    }

    #[test]
    fn loopback_reprojects_on_schema_change() {
        let cloud = LoopbackTransport::new();
        let old = vec![
            FieldInfo::new("a", StorageType::Integer),
            FieldInfo::new("b", StorageType::Text),
        ];
        let new = vec![
            FieldInfo::new("b", StorageType::Text),
            FieldInfo::new("c", StorageType::Integer),
        ];
        cloud
            .push(&TableBatch {
                store: "s".into(),
                table: "t".into(),
                fields: old.clone(),
                items: vec![item(&old, vec![Value::Integer(1), Value::from("x")], 1, 1)],
            })
            .unwrap();
        cloud
            .push(&TableBatch {
                store: "s".into(),
                table: "t".into(),
                fields: new.clone(),
                items: vec![item(&new, vec![Value::from("y"), Value::Integer(2)], 2, 2)],
            })
            .unwrap();
        let pulled = cloud.pull("s", "t", 0).unwrap();
        assert_eq!(pulled.fields, new);
        let rows = transform_data_items(&pulled.items, &pulled.fields, &new).unwrap();
        assert_eq!(rows[0].columns, vec![Value::from("x"), Value::Null]);
        assert_eq!(cloud.row_count("s", "t"), 2);
    }
}

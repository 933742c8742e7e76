//! Execution of one sync attempt.

use crate::error::SyncResult;
use crate::request::{SyncPlan, SyncSummary, TableSummary};
use crate::transport::{SyncTransport, TableBatch};
use distdb_codec::{transform_data_items, transform_table_data};
use distdb_storage::{Connection, ReadQuery, StoreCache};
use std::sync::Arc;
use tracing::debug;

/// Performs one attempt of a planned sync.
///
/// Called on a worker thread; may block on I/O. The scheduler owns retry,
/// so implementations report transient failures as retryable errors rather
/// than looping themselves.
pub trait SyncRunner: Send + Sync {
    /// Runs `plan` once.
    ///
    /// # Errors
    ///
    /// Any [`crate::SyncError`]; retryable ones are rescheduled.
    fn run(&self, plan: &SyncPlan) -> SyncResult<SyncSummary>;
}

impl<F> SyncRunner for F
where
    F: Fn(&SyncPlan) -> SyncResult<SyncSummary> + Send + Sync,
{
    fn run(&self, plan: &SyncPlan) -> SyncResult<SyncSummary> {
        self(plan)
    }
}

/// Syncs tables through a store connection and a transport.
///
/// Per table: read local rows, encode them under the local schema and push
/// them; pull remote rows, decode them under the remote schema, re-project
/// them onto the local schema and apply them. The connection is held only
/// for the duration of the attempt.
pub struct StoreSyncRunner {
    stores: Arc<StoreCache>,
    transport: Arc<dyn SyncTransport>,
}

impl StoreSyncRunner {
    /// Creates a runner over `stores` and `transport`.
    pub fn new(stores: Arc<StoreCache>, transport: Arc<dyn SyncTransport>) -> Self {
        Self { stores, transport }
    }

    fn push_table(
        &self,
        conn: &Connection,
        store: &str,
        table: &str,
        query: &ReadQuery,
    ) -> SyncResult<usize> {
        let fields = conn.schema(table)?;
        let rows = conn.read(table, query)?;
        if rows.is_empty() {
            return Ok(0);
        }
        let items = transform_table_data(&rows, &fields)?;
        let batch = TableBatch {
            store: store.to_string(),
            table: table.to_string(),
            fields,
            items,
        };
        self.transport.push(&batch)?;
        Ok(batch.items.len())
    }

    fn pull_table(
        &self,
        conn: &Connection,
        store: &str,
        table: &str,
    ) -> SyncResult<(usize, usize)> {
        let local = conn.schema(table)?;
        let batch = self.transport.pull(store, table, 0)?;
        if batch.items.is_empty() {
            return Ok((0, 0));
        }
        let rows = transform_data_items(&batch.items, &batch.fields, &local)?;
        let applied = conn.write(table, &rows)?;
        Ok((rows.len(), applied))
    }
}

impl SyncRunner for StoreSyncRunner {
    fn run(&self, plan: &SyncPlan) -> SyncResult<SyncSummary> {
        let conn = self.stores.acquire(&plan.properties)?;
        let store = plan.properties.identity.identifier_hex();
        let query = plan.query.clone().unwrap_or_default();
        let mut summary = SyncSummary {
            tables: Vec::with_capacity(plan.tables.len()),
            attempts: plan.attempt,
        };

        for table in &plan.tables {
            let mut entry = TableSummary {
                table: table.clone(),
                ..TableSummary::default()
            };
            if plan.mode.push_first() {
                entry.pushed = self.push_table(&conn, &store, table, &query)?;
                if plan.mode.pulls() {
                    (entry.pulled, entry.applied) = self.pull_table(&conn, &store, table)?;
                }
            } else {
                if plan.mode.pulls() {
                    (entry.pulled, entry.applied) = self.pull_table(&conn, &store, table)?;
                }
                if plan.mode.pushes() {
                    entry.pushed = self.push_table(&conn, &store, table, &query)?;
                }
            }
            debug!(
                store = %plan.properties.identity.anonymous(),
                table = %table,
                pushed = entry.pushed,
                pulled = entry.pulled,
                applied = entry.applied,
                "table synced"
            );
            summary.tables.push(entry);
        }
        Ok(summary)
    }
}

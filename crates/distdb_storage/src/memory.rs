//! In-memory reference engine.

use crate::engine::{EngineOpener, ReadQuery, StorageEngine, StoreProperties};
use crate::error::{StorageError, StorageResult};
use distdb_codec::{FieldInfo, RowWithLog};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Table {
    fields: Vec<FieldInfo>,
    rows: BTreeMap<Vec<u8>, RowWithLog>,
}

type Tables = Arc<RwLock<HashMap<String, Table>>>;

/// An in-memory storage engine.
///
/// Rows are keyed by their log hash key. A write replaces the stored
/// version when its timestamp is not older (last writer wins); tombstones
/// are kept so they can be synced onward.
///
/// # Example
///
/// ```rust
/// use distdb_codec::{FieldInfo, LogInfo, RowWithLog, StorageType, Value};
/// use distdb_storage::{InMemoryEngine, ReadQuery, StorageEngine};
///
/// let engine = InMemoryEngine::new();
/// engine.create_table("t", &[FieldInfo::new("id", StorageType::Integer)]).unwrap();
/// let log = LogInfo { timestamp: 1, hash_key: vec![1], ..LogInfo::default() };
/// engine.write("t", &[RowWithLog::new(vec![Value::Integer(7)], log)]).unwrap();
/// assert_eq!(engine.read("t", &ReadQuery::all()).unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    tables: Tables,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tables(tables: Tables) -> Self {
        Self {
            tables,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns true once [`StorageEngine::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl StorageEngine for InMemoryEngine {
    fn create_table(&self, table: &str, fields: &[FieldInfo]) -> StorageResult<()> {
        self.check_open()?;
        if table.is_empty() {
            return Err(StorageError::invalid_argument("empty table name"));
        }
        let mut tables = self.tables.write();
        match tables.get(table) {
            Some(existing) if existing.fields != fields => Err(StorageError::schema_mismatch(
                table,
                format!(
                    "table has {} fields, requested {}",
                    existing.fields.len(),
                    fields.len()
                ),
            )),
            Some(_) => Ok(()),
            None => {
                tables.insert(
                    table.to_string(),
                    Table {
                        fields: fields.to_vec(),
                        rows: BTreeMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    fn schema(&self, table: &str) -> StorageResult<Vec<FieldInfo>> {
        self.check_open()?;
        self.tables
            .read()
            .get(table)
            .map(|t| t.fields.clone())
            .ok_or_else(|| StorageError::TableNotFound {
                table: table.to_string(),
            })
    }

    fn read(&self, table: &str, query: &ReadQuery) -> StorageResult<Vec<RowWithLog>> {
        self.check_open()?;
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| StorageError::TableNotFound {
            table: table.to_string(),
        })?;

        let mut filters = Vec::with_capacity(query.conditions.len());
        for cond in &query.conditions {
            let index = t
                .fields
                .iter()
                .position(|f| f.name == cond.column)
                .ok_or_else(|| {
                    StorageError::invalid_argument(format!("unknown column {}", cond.column))
                })?;
            filters.push((index, &cond.value));
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(t.rows
            .values()
            .filter(|row| row.log.timestamp > query.since)
            .filter(|row| {
                filters.is_empty()
                    || (!row.is_deleted()
                        && filters
                            .iter()
                            .all(|(i, v)| row.columns.get(*i) == Some(*v)))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn write(&self, table: &str, rows: &[RowWithLog]) -> StorageResult<usize> {
        self.check_open()?;
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound {
                table: table.to_string(),
            })?;

        // Validate the whole batch before applying any of it.
        for row in rows {
            if !row.is_deleted() && row.columns.len() != t.fields.len() {
                return Err(StorageError::schema_mismatch(
                    table,
                    format!(
                        "row has {} columns, table has {}",
                        row.columns.len(),
                        t.fields.len()
                    ),
                ));
            }
        }

        let mut applied = 0;
        for row in rows {
            let newer = t
                .rows
                .get(&row.log.hash_key)
                .map_or(true, |existing| row.log.timestamp >= existing.log.timestamp);
            if newer {
                let mut stored = row.clone();
                if stored.is_deleted() {
                    stored.columns.clear();
                }
                t.rows.insert(row.log.hash_key.clone(), stored);
                applied += 1;
            }
        }
        Ok(applied)
    }

    fn set_connection_flag(&self, active: bool) {
        self.connected.store(active, Ordering::Release);
    }

    fn has_connection(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Opens [`InMemoryEngine`]s, one data volume per data directory.
///
/// Reopening the same directory sees the rows written before the previous
/// engine closed, like a file-backed engine would.
#[derive(Debug, Default)]
pub struct InMemoryOpener {
    volumes: Mutex<HashMap<PathBuf, Tables>>,
    opened: AtomicUsize,
    fail_next: AtomicUsize,
}

impl InMemoryOpener {
    /// Creates an opener with no volumes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` opens fail with `EngineInitFailed`.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Number of engines successfully opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl EngineOpener for InMemoryOpener {
    fn open(&self, properties: &StoreProperties) -> StorageResult<Arc<dyn StorageEngine>> {
        properties.identity.validate()?;
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::engine_init(format!(
                "cannot open {}",
                properties.data_dir.display()
            )));
        }
        if properties.encrypted && properties.password.is_empty() {
            return Err(StorageError::engine_init("encrypted store without a key"));
        }
        let tables = self
            .volumes
            .lock()
            .entry(properties.data_dir.clone())
            .or_default()
            .clone();
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryEngine::with_tables(tables)))
    }
}

//! Simulate command implementation.
//!
//! Builds two in-process devices that share a loopback cloud, seeds rows on
//! the first, pushes them and pulls them on the second.

use distdb_codec::{FieldInfo, LogInfo, RowWithLog, StorageType, Value};
use distdb_service::{DataService, ProcessContext, ServiceConfig, SyncOption, SyncerParam};
use distdb_storage::{InMemoryOpener, ReadQuery};
use distdb_sync::{LoopbackTransport, SyncMode, SyncTransport, WaitPolicy};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const BUNDLE: &str = "com.distdb.simulate";
const STORE: &str = "notes.db";
const TABLE: &str = "notes";

/// Simulation result.
#[derive(Debug, Serialize)]
pub struct SimulateResult {
    /// Rows seeded on the sending device.
    pub seeded: usize,
    /// Rows pushed to the cloud.
    pub pushed: usize,
    /// Rows pulled by the receiving device.
    pub pulled: usize,
    /// Rows readable on the receiving device afterwards.
    pub received: usize,
    /// Attempts the push and pull took.
    pub attempts: u32,
}

/// Runs the simulate command.
pub fn run(
    rows: usize,
    config: Option<&Path>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = match config {
        Some(path) => ServiceConfig::from_file(path)?,
        None => ServiceConfig::default(),
    };
    let cloud: Arc<dyn SyncTransport> = Arc::new(LoopbackTransport::new());
    let sender = device("device-a", &config, &cloud)?;
    let receiver = device("device-b", &config, &cloud)?;
    let result = exchange(&sender, &receiver, rows, config.block_timeout);
    sender.shutdown();
    receiver.shutdown();
    let result = result?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            println!("Seeded:   {}", result.seeded);
            println!("Pushed:   {}", result.pushed);
            println!("Pulled:   {}", result.pulled);
            println!("Received: {}", result.received);
            println!("Attempts: {}", result.attempts);
        }
    }
    Ok(())
}

fn device(
    name: &str,
    config: &ServiceConfig,
    cloud: &Arc<dyn SyncTransport>,
) -> Result<DataService, Box<dyn std::error::Error>> {
    Ok(DataService::builder(name)
        .with_config(config.clone())
        .with_opener(Arc::new(InMemoryOpener::new()))
        .with_transport(Arc::clone(cloud))
        .build()?)
}

fn exchange(
    sender: &DataService,
    receiver: &DataService,
    rows: usize,
    timeout: Duration,
) -> Result<SimulateResult, Box<dyn std::error::Error>> {
    let a = ProcessContext::new(1, 20_000, 1, 100);
    let b = ProcessContext::new(2, 20_000, 2, 100);
    let param = SyncerParam::new(BUNDLE, STORE);
    let seeded: Vec<RowWithLog> = (1..=rows as u64)
        .map(|ts| {
            let log = LogInfo {
                timestamp: ts,
                write_timestamp: ts,
                origin_device: "device-a".into(),
                device: "device-a".into(),
                hash_key: ts.to_le_bytes().to_vec(),
                flags: LogInfo::LOCAL_FLAG,
            };
            RowWithLog::new(vec![Value::Text(format!("note {ts}"))], log)
        })
        .collect();
    seed(sender, &a, &param, &seeded)?;
    seed(receiver, &b, &param, &[])?;

    let wait = WaitPolicy::Block { timeout };
    let push = SyncOption::new([TABLE]).with_mode(SyncMode::Push).with_wait(wait);
    let pull = SyncOption::new([TABLE]).with_mode(SyncMode::Pull).with_wait(wait);
    let pushed = sender.do_sync(&a, &param, &push, None)?;
    tracing::info!(rows = pushed.pushed(), "pushed from device-a");
    let pulled = receiver.do_sync(&b, &param, &pull, None)?;
    tracing::info!(rows = pulled.pulled(), "pulled on device-b");

    let session = receiver.session(&b, &param)?;
    let store = session.store().ok_or("session released after sync")?;
    let received = store.acquire()?.read(TABLE, &ReadQuery::all())?.len();

    Ok(SimulateResult {
        seeded: seeded.len(),
        pushed: pushed.pushed(),
        pulled: pulled.pulled(),
        received,
        attempts: pushed.attempts + pulled.attempts,
    })
}

fn seed(
    service: &DataService,
    ctx: &ProcessContext,
    param: &SyncerParam,
    rows: &[RowWithLog],
) -> Result<(), Box<dyn std::error::Error>> {
    let session = service.session(ctx, param)?;
    let store = session.store().ok_or("session released during setup")?;
    let conn = store.acquire()?;
    conn.create_table(TABLE, &[FieldInfo::new("body", StorageType::Text)])?;
    conn.write(TABLE, rows)?;
    Ok(())
}

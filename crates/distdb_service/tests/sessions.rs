//! Session registry scenarios through the data service.

use distdb_codec::{FieldInfo, LogInfo, RowWithLog, StorageType, Value};
use distdb_service::{
    ChannelNotifier, DataService, ProcessContext, RegistryConfig, ServiceConfig, ServiceError,
    Status, SyncOption, SyncerParam,
};
use distdb_storage::{InMemoryOpener, LifecycleState, ReadQuery};
use distdb_sync::{
    LoopbackTransport, MockTransport, RetryPolicy, SchedulerConfig, SyncError, SyncMode, WaitPolicy,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

fn ctx(pid: u32) -> ProcessContext {
    ProcessContext::new(pid, 20_000, 7, 100)
}

fn param(store: &str) -> SyncerParam {
    SyncerParam::new("com.example.notes", format!("{store}.db"))
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn seed(service: &DataService, ctx: &ProcessContext, store: &str, rows: &[(&str, u64)]) {
    let session = service.session(ctx, &param(store)).unwrap();
    let conn = session.store().unwrap().acquire().unwrap();
    conn.create_table("notes", &[FieldInfo::new("body", StorageType::Text)])
        .unwrap();
    let rows: Vec<RowWithLog> = rows
        .iter()
        .map(|(body, ts)| {
            let log = LogInfo {
                timestamp: *ts,
                write_timestamp: *ts,
                hash_key: ts.to_le_bytes().to_vec(),
                ..LogInfo::default()
            };
            RowWithLog::new(vec![Value::from(*body)], log)
        })
        .collect();
    conn.write("notes", &rows).unwrap();
}

#[test]
fn process_cap_rejects_without_evicting() {
    let config = ServiceConfig::default().with_registry(
        RegistryConfig::default()
            .with_max_sessions_per_process(3)
            .with_max_sessions(10),
    );
    let service = DataService::builder("device-a")
        .with_config(config)
        .build()
        .unwrap();

    let sessions: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|s| service.session(&ctx(1), &param(s)).unwrap())
        .collect();
    let result = service.session(&ctx(1), &param("d"));
    assert_eq!(Status::of(&result), Status::ResourceExhausted);
    assert!(matches!(result, Err(ServiceError::ResourceExhausted { .. })));

    assert_eq!(service.registry().process_session_count(1), 3);
    for session in &sessions {
        assert!(!session.is_released());
        let again = service.session(&ctx(1), &param(session.store_id())).unwrap();
        assert!(Arc::ptr_eq(session, &again));
    }
    service.shutdown();
}

#[test]
fn process_death_releases_both_sessions() {
    let service = DataService::builder("device-a").build().unwrap();
    let (notifier, _receivers) = ChannelNotifier::new();
    service
        .init_notifier(&ctx(9), &param("a"), Arc::new(notifier))
        .unwrap();
    let a = service.session(&ctx(9), &param("a")).unwrap();
    let b = service.session(&ctx(9), &param("b")).unwrap();
    let stores = [a.store().unwrap(), b.store().unwrap()];
    let identity = a.identity().clone();
    drop((a, b));

    service.on_process_died(9);

    for store in &stores {
        assert_eq!(store.state(), LifecycleState::Closed);
        assert_eq!(store.connection_count(), 0);
    }
    assert_eq!(service.registry().session_count(), 0);
    assert_eq!(service.registry().process_count(), 0);
    assert!(service.registry().get(9, "a").is_none());
    assert!(service.notifiers().is_empty());
    assert_eq!(service.notifiers().subscriber(&identity), None);

    // The process may come back with a fresh session.
    let fresh = service.session(&ctx(9), &param("a")).unwrap();
    assert!(!fresh.is_released());
    service.shutdown();
}

#[test]
fn stop_sync_cancels_owned_requests() {
    let slow = RetryPolicy::client().with_retry_interval(Duration::from_secs(60));
    let config = ServiceConfig::default()
        .with_scheduler(SchedulerConfig::new().with_client_retry(slow));
    let transport = Arc::new(MockTransport::new());
    transport.fail_always(SyncError::network("offline"));
    let service = DataService::builder("device-a")
        .with_config(config)
        .with_transport(transport)
        .build()
        .unwrap();
    seed(&service, &ctx(4), "a", &[("x", 1)]);

    let (tx, rx) = std::sync::mpsc::channel();
    let id = service
        .sync(
            &ctx(4),
            &param("a"),
            &SyncOption::new(["notes"]),
            None,
            Some(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
        )
        .unwrap();
    // Another process's stop does not touch it.
    assert_eq!(service.stop_sync(5), 0);
    assert_eq!(service.stop_sync(4), 1);

    let outcome = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(outcome.request_id, id);
    assert_eq!(outcome.result, Err(SyncError::Cancelled));
    assert_eq!(service.stop_sync(4), 0);
    service.shutdown();
}

#[test]
fn cloud_sync_event_runs_service_sync() {
    let cloud = Arc::new(LoopbackTransport::new());
    let service = DataService::builder("device-a")
        .with_transport(cloud.clone())
        .build()
        .unwrap();
    seed(&service, &ctx(1), "a", &[("one", 1), ("two", 2)]);
    let properties = service.properties(&ctx(1), &param("a"));
    let store = properties.identity.identifier_hex();

    let delivered = service
        .events()
        .post(distdb_service::Event::CloudSyncTriggered(
            distdb_service::CloudSyncEvent {
                user: 100,
                properties,
                tables: vec!["notes".into()],
                mode: SyncMode::Push,
            },
        ));
    assert_eq!(delivered, 1);
    assert!(wait_until(|| cloud.row_count(&store, "notes") == 2));
    service.shutdown();
}

#[test]
fn two_devices_exchange_rows_through_cloud() {
    let cloud = Arc::new(LoopbackTransport::new());
    let device = |name: &str| {
        DataService::builder(name)
            .with_opener(Arc::new(InMemoryOpener::new()))
            .with_transport(cloud.clone())
            .build()
            .unwrap()
    };
    let a = device("device-a");
    let b = device("device-b");
    seed(&a, &ctx(1), "shared", &[("from a", 10)]);
    seed(&b, &ctx(2), "shared", &[]);

    let block = WaitPolicy::Block { timeout: WAIT };
    let push = SyncOption::new(["notes"]).with_mode(SyncMode::Push).with_wait(block);
    let pull = SyncOption::new(["notes"]).with_mode(SyncMode::Pull).with_wait(block);
    assert_eq!(a.do_sync(&ctx(1), &param("shared"), &push, None).unwrap().pushed(), 1);
    assert_eq!(b.do_sync(&ctx(2), &param("shared"), &pull, None).unwrap().pulled(), 1);

    let session = b.session(&ctx(2), &param("shared")).unwrap();
    let conn = session.store().unwrap().acquire().unwrap();
    let rows = conn.read("notes", &ReadQuery::all()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns, vec![Value::from("from a")]);
    a.shutdown();
    b.shutdown();
}

//! The caller-facing data service.

use crate::access::{AccessChecker, AllowAll};
use crate::config::ServiceConfig;
use crate::context::{ProcessContext, SyncerParam};
use crate::error::{ServiceError, ServiceResult};
use crate::event::{CloudSyncEvent, Event, EventCenter, EventKind, SchemaInfo};
use crate::meta::{MemoryMetaStore, MetaStore, StoreMetaData};
use crate::notifier::{NotifierRegistry, SyncNotifier};
use crate::registry::{SyncerRegistry, SyncerSession};
use distdb_storage::{
    anonymize, CipherType, EngineOpener, InMemoryOpener, ReadQuery, StoreCache, StoreIdentity,
    StoreProperties,
};
use distdb_sync::{
    ExecutorPool, LoopbackTransport, RequestId, RequestOrigin, StoreSyncRunner, SyncCallback,
    SyncError, SyncMode, SyncOutcome, SyncRequest, SyncScheduler, SyncSummary, SyncTransport,
    UserFilter, WaitPolicy,
};
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Weak};
use tracing::{debug, error, info, warn};

/// Key-derivation rounds handed to the engine for encrypted stores.
pub const ENCRYPT_ITERATIONS: u32 = 10_000;

/// What to sync and how.
#[derive(Debug, Clone, Default)]
pub struct SyncOption {
    /// Tables to sync.
    pub tables: Vec<String>,
    /// Direction.
    pub mode: SyncMode,
    /// Whether [`DataService::sync`] blocks.
    pub wait: WaitPolicy,
}

impl SyncOption {
    /// Option syncing `tables` with the default mode.
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the direction.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the wait policy.
    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }
}

/// Parameters the engine needs to open a store on a peer's request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoLaunchParam {
    /// Owning account.
    pub user: String,
    /// Application id.
    pub app_id: String,
    /// Store id.
    pub store_id: String,
    /// Directory of the store files.
    pub data_dir: String,
    /// Whether the store is encrypted.
    pub encrypted: bool,
    /// Cipher for encrypted stores.
    pub cipher: Option<CipherType>,
    /// Key-derivation rounds for encrypted stores.
    pub iterations: u32,
}

struct ServiceInner {
    config: ServiceConfig,
    device_id: String,
    data_root: PathBuf,
    executor: ExecutorPool,
    scheduler: SyncScheduler,
    registry: SyncerRegistry,
    meta: Arc<dyn MetaStore>,
    events: EventCenter,
    access: Arc<dyn AccessChecker>,
    notifiers: NotifierRegistry,
}

/// Builds a [`DataService`].
pub struct DataServiceBuilder {
    device_id: String,
    config: ServiceConfig,
    data_root: PathBuf,
    opener: Arc<dyn EngineOpener>,
    transport: Arc<dyn SyncTransport>,
    meta: Arc<dyn MetaStore>,
    access: Arc<dyn AccessChecker>,
}

impl DataServiceBuilder {
    /// Sets the configuration.
    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the directory stores are created under.
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = root.into();
        self
    }

    /// Sets the storage engine opener.
    pub fn with_opener(mut self, opener: Arc<dyn EngineOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Sets the transport to the cloud or peers.
    pub fn with_transport(mut self, transport: Arc<dyn SyncTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the metadata store.
    pub fn with_meta_store(mut self, meta: Arc<dyn MetaStore>) -> Self {
        self.meta = meta;
        self
    }

    /// Sets the access checker.
    pub fn with_access_checker(mut self, access: Arc<dyn AccessChecker>) -> Self {
        self.access = access;
        self
    }

    /// Starts the service.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` if the worker pool cannot start.
    pub fn build(self) -> ServiceResult<DataService> {
        let config = self.config;
        let executor = ExecutorPool::new(config.pool)?;
        let stores = Arc::new(StoreCache::with_config(self.opener, config.store_cache));
        let runner = Arc::new(StoreSyncRunner::new(Arc::clone(&stores), self.transport));
        let scheduler = SyncScheduler::new(executor.clone(), runner, config.scheduler.clone());
        let registry = SyncerRegistry::new(config.registry.clone(), stores, executor.clone());
        let events = EventCenter::new(executor.clone());
        let inner = Arc::new(ServiceInner {
            config,
            device_id: self.device_id,
            data_root: self.data_root,
            executor,
            scheduler,
            registry,
            meta: self.meta,
            events,
            access: self.access,
            notifiers: NotifierRegistry::new(),
        });

        let weak: Weak<ServiceInner> = Arc::downgrade(&inner);
        inner
            .events
            .subscribe_fn(EventKind::CloudSyncTriggered, move |event| {
                if let (Some(inner), Event::CloudSyncTriggered(sync)) = (weak.upgrade(), event) {
                    inner.on_cloud_sync(sync);
                }
            });
        info!(device = %anonymize(&inner.device_id), "data service started");
        Ok(DataService { inner })
    }
}

/// Entry point for client processes: sessions, sync requests, schema
/// registration and notifications.
///
/// Constructed once per process and passed by handle; every call returns a
/// [`ServiceResult`] whose error maps to a [`crate::Status`] code.
#[derive(Clone)]
pub struct DataService {
    inner: Arc<ServiceInner>,
}

impl DataService {
    /// Starts building a service for the local device `device_id`.
    pub fn builder(device_id: impl Into<String>) -> DataServiceBuilder {
        DataServiceBuilder {
            device_id: device_id.into(),
            config: ServiceConfig::default(),
            data_root: PathBuf::from("/data/distdb"),
            opener: Arc::new(InMemoryOpener::new()),
            transport: Arc::new(LoopbackTransport::new()),
            meta: Arc::new(MemoryMetaStore::new()),
            access: Arc::new(AllowAll),
        }
    }

    /// Local device id.
    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// Session registry.
    pub fn registry(&self) -> &SyncerRegistry {
        &self.inner.registry
    }

    /// Sync scheduler.
    pub fn scheduler(&self) -> &SyncScheduler {
        &self.inner.scheduler
    }

    /// Event center.
    pub fn events(&self) -> &EventCenter {
        &self.inner.events
    }

    /// Notifier registry.
    pub fn notifiers(&self) -> &NotifierRegistry {
        &self.inner.notifiers
    }

    /// Store properties the caller's parameters resolve to.
    pub fn properties(&self, ctx: &ProcessContext, param: &SyncerParam) -> StoreProperties {
        self.inner.properties(ctx, param)
    }

    /// Returns the caller's session for the store, creating it if needed.
    ///
    /// # Errors
    ///
    /// `InvalidArgument`, `PermissionDenied`, `ResourceExhausted` or the
    /// error opening the store.
    pub fn session(
        &self,
        ctx: &ProcessContext,
        param: &SyncerParam,
    ) -> ServiceResult<Arc<SyncerSession>> {
        self.inner.session(ctx, param)
    }

    /// Schedules a sync and returns its request id. `callback` fires
    /// exactly once with the terminal result.
    ///
    /// # Errors
    ///
    /// Fails before scheduling on bad parameters, denied access or a
    /// session cap; the callback is not called then.
    pub fn sync(
        &self,
        ctx: &ProcessContext,
        param: &SyncerParam,
        option: &SyncOption,
        query: Option<ReadQuery>,
        callback: Option<SyncCallback>,
    ) -> ServiceResult<RequestId> {
        let session = self.inner.session(ctx, param)?;
        let mut request = self.inner.request(ctx, &session, option, query);
        if let Some(callback) = callback {
            request = request.with_callback(callback);
        }
        Ok(self.inner.scheduler.submit(request)?)
    }

    /// Runs a sync and waits for its result, up to the option's block
    /// timeout or the configured default.
    ///
    /// # Errors
    ///
    /// As [`sync`](Self::sync), plus the sync's own error, or `Timeout` if
    /// the result did not arrive in time; the request keeps running then.
    pub fn do_sync(
        &self,
        ctx: &ProcessContext,
        param: &SyncerParam,
        option: &SyncOption,
        query: Option<ReadQuery>,
    ) -> ServiceResult<SyncSummary> {
        let timeout = match option.wait {
            WaitPolicy::Block { timeout } => timeout,
            WaitPolicy::Async => self.inner.config.block_timeout,
        };
        let session = self.inner.session(ctx, param)?;
        let (request, rx) = self
            .inner
            .request(ctx, &session, option, query)
            .with_channel();
        let request_id = self.inner.scheduler.submit(request)?;
        match rx.recv_timeout(timeout) {
            Ok(outcome) => Ok(outcome.result?),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(request = request_id, "blocking sync timed out");
                Err(ServiceError::Timeout { request_id })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(ServiceError::Sync(SyncError::Cancelled))
            }
        }
    }

    /// Schedules a sync whose result goes to the caller's registered
    /// notifier, tagged with `seq`.
    ///
    /// # Errors
    ///
    /// As [`sync`](Self::sync).
    pub fn do_async(
        &self,
        ctx: &ProcessContext,
        param: &SyncerParam,
        seq: u32,
        option: &SyncOption,
        query: Option<ReadQuery>,
    ) -> ServiceResult<RequestId> {
        let session = self.inner.session(ctx, param)?;
        let weak = Arc::downgrade(&self.inner);
        let pid = ctx.pid;
        let request = self
            .inner
            .request(ctx, &session, option, query)
            .with_callback(move |outcome: SyncOutcome| {
                if let Some(inner) = weak.upgrade() {
                    inner.notifiers.notify_complete(pid, seq, &outcome);
                }
            });
        let id = self.inner.scheduler.submit(request)?;
        debug!(pid, seq, request = id, "async sync scheduled");
        Ok(id)
    }

    /// Cancels every sync owned by process `owner`. Returns how many were
    /// cancelled.
    pub fn stop_sync(&self, owner: u32) -> usize {
        self.inner.scheduler.cancel(UserFilter::Owner(u64::from(owner)))
    }

    /// Marks `tables` of the store as synchronized with peers.
    ///
    /// # Errors
    ///
    /// As [`session`](Self::session), plus `NotFound` if a table does not
    /// exist.
    pub fn set_distributed_tables(
        &self,
        ctx: &ProcessContext,
        param: &SyncerParam,
        tables: &[String],
    ) -> ServiceResult<()> {
        self.inner.session(ctx, param)?.set_distributed_tables(tables)
    }

    /// Registers the caller's notifier.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` or `PermissionDenied`.
    pub fn init_notifier(
        &self,
        ctx: &ProcessContext,
        param: &SyncerParam,
        notifier: Arc<dyn SyncNotifier>,
    ) -> ServiceResult<()> {
        self.inner.check_access(ctx, param)?;
        self.inner.notifiers.register(ctx.pid, notifier);
        Ok(())
    }

    /// Routes change notifications of the store to the caller.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` or `PermissionDenied`.
    pub fn subscribe(&self, ctx: &ProcessContext, param: &SyncerParam) -> ServiceResult<()> {
        self.inner.check_access(ctx, param)?;
        let properties = self.inner.properties(ctx, param);
        self.inner.notifiers.subscribe(&properties.identity, ctx.pid);
        Ok(())
    }

    /// Stops change notifications of the store.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` or `PermissionDenied`.
    pub fn unsubscribe(&self, ctx: &ProcessContext, param: &SyncerParam) -> ServiceResult<()> {
        self.inner.check_access(ctx, param)?;
        let properties = self.inner.properties(ctx, param);
        self.inner.notifiers.unsubscribe(&properties.identity);
        Ok(())
    }

    /// Reports that `device` changed rows of `identity`; a `pid` of 0 is
    /// resolved through subscriptions.
    pub fn on_data_change(&self, pid: u32, identity: &StoreIdentity, device: &str) -> bool {
        self.inner.notifiers.on_data_change(pid, identity, device)
    }

    /// Posts the feature-init event.
    pub fn on_initialize(&self, ctx: &ProcessContext) -> ServiceResult<()> {
        self.inner.events.post(Event::FeatureInit { token: ctx.token });
        Ok(())
    }

    /// Records the store's metadata and announces its schema.
    ///
    /// A schema version of `-1` is accepted without doing anything.
    ///
    /// # Errors
    ///
    /// `PermissionDenied`, `MetaConflict` if the stored metadata disagrees
    /// on type, encryption or area, or a metadata store error.
    pub fn get_schema(&self, ctx: &ProcessContext, param: &SyncerParam) -> ServiceResult<()> {
        let inner = &self.inner;
        inner.check_access(ctx, param)?;
        if param.schema_version == -1 {
            return Ok(());
        }
        let meta = inner.store_meta(ctx, param);
        let key = meta.key();
        if let Some(old) = inner.meta.load(&key, true)? {
            let conflict = if old.store_type != meta.store_type {
                Some(format!("type {} -> {}", old.store_type, meta.store_type))
            } else if old.encrypted != meta.encrypted {
                Some(format!("encrypt {} -> {}", old.encrypted, meta.encrypted))
            } else if old.area != meta.area {
                Some(format!("area {} -> {}", old.area, meta.area))
            } else {
                None
            };
            if let Some(message) = conflict {
                error!(
                    bundle = %meta.bundle_name,
                    store = %meta.store_id,
                    %message,
                    "metadata conflict"
                );
                return Err(ServiceError::MetaConflict {
                    store: meta.store_id,
                    message,
                });
            }
        }
        if !inner.meta.save_meta(&key, &meta, true)? {
            return Err(ServiceError::meta(format!("could not save {key}")));
        }
        inner.events.post(Event::GetSchema(SchemaInfo {
            token: ctx.token,
            bundle_name: param.bundle_name.clone(),
            store_id: meta.store_id,
            instance_id: meta.instance_id,
            schema_version: param.schema_version,
        }));
        Ok(())
    }

    /// Finds the local store whose cross-device identifier is
    /// `identifier` (hex) so a peer's request can open it.
    ///
    /// # Errors
    ///
    /// `NotFound` if no local store matches, or a metadata store error.
    pub fn resolve_auto_launch(&self, identifier: &str) -> ServiceResult<AutoLaunchParam> {
        let inner = &self.inner;
        let prefix = StoreMetaData::prefix(&[inner.device_id.as_str()]);
        let entries = inner.meta.load_meta(&prefix, false)?;
        debug!(
            identifier = %anonymize(identifier),
            entries = entries.len(),
            "resolving auto launch"
        );
        let found = entries.into_iter().find(|entry| {
            StoreIdentity::new(&entry.user, &entry.app_id, &entry.store_id).identifier_hex()
                == identifier
        });
        let Some(entry) = found else {
            warn!(identifier = %anonymize(identifier), "no store for identifier");
            return Err(ServiceError::not_found(format!(
                "store {}",
                anonymize(identifier)
            )));
        };
        info!(store = %entry.store_id, "auto launch resolved");
        Ok(AutoLaunchParam {
            user: entry.user,
            app_id: entry.app_id,
            store_id: entry.store_id,
            data_dir: entry.data_dir,
            encrypted: entry.encrypted,
            cipher: entry.encrypted.then_some(CipherType::Aes256Gcm),
            iterations: if entry.encrypted { ENCRYPT_ITERATIONS } else { 0 },
        })
    }

    /// Forgets a dead client process: its sessions, notifier and
    /// subscriptions. Its queued syncs are cancelled.
    pub fn on_process_died(&self, pid: u32) {
        let inner = &self.inner;
        info!(pid, "client died");
        inner.registry.on_process_died(pid);
        inner.notifiers.remove_process(pid);
        inner.scheduler.cancel(UserFilter::Owner(u64::from(pid)));
    }

    /// Cancels all work and releases every session.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        inner.registry.clear();
        inner.scheduler.shutdown();
        inner.executor.shutdown();
        info!("data service stopped");
    }
}

impl ServiceInner {
    fn properties(&self, ctx: &ProcessContext, param: &SyncerParam) -> StoreProperties {
        let identity = StoreIdentity::new(
            ctx.user.to_string(),
            param.bundle_name.clone(),
            param.store_id(),
        );
        let data_dir = self
            .data_root
            .join(ctx.user.to_string())
            .join(&param.bundle_name)
            .join(param.store_id());
        let mut properties =
            StoreProperties::new(identity, data_dir).with_pool(self.config.engine_pool);
        if param.encrypted {
            properties =
                properties.with_encryption(CipherType::Aes256Gcm, param.password.to_vec());
        }
        properties
    }

    fn check_access(&self, ctx: &ProcessContext, param: &SyncerParam) -> ServiceResult<()> {
        param.validate()?;
        if !self.access.check(&param.bundle_name, param.store_id(), ctx) {
            warn!(pid = ctx.pid, bundle = %param.bundle_name, "permission denied");
            return Err(ServiceError::PermissionDenied {
                bundle: param.bundle_name.clone(),
                store: param.store_id().to_string(),
            });
        }
        Ok(())
    }

    fn session(
        &self,
        ctx: &ProcessContext,
        param: &SyncerParam,
    ) -> ServiceResult<Arc<SyncerSession>> {
        self.check_access(ctx, param)?;
        let properties = self.properties(ctx, param);
        let session = self.registry.get_or_create(ctx, properties)?;
        self.notifiers.subscribe(session.identity(), ctx.pid);
        Ok(session)
    }

    fn request(
        &self,
        ctx: &ProcessContext,
        session: &SyncerSession,
        option: &SyncOption,
        query: Option<ReadQuery>,
    ) -> SyncRequest {
        let tables = option.tables.iter().cloned();
        let mut request = SyncRequest::new(ctx.user, session.properties().clone(), tables)
            .with_owner(u64::from(ctx.pid))
            .with_mode(option.mode)
            .with_wait(option.wait)
            .with_origin(RequestOrigin::Client);
        if let Some(query) = query {
            request = request.with_query(query);
        }
        request
    }

    fn store_meta(&self, ctx: &ProcessContext, param: &SyncerParam) -> StoreMetaData {
        let properties = self.properties(ctx, param);
        StoreMetaData {
            device_id: self.device_id.clone(),
            user: properties.identity.user.clone(),
            bundle_name: param.bundle_name.clone(),
            app_id: properties.identity.app_id.clone(),
            store_id: properties.identity.store_id.clone(),
            hap_name: param.hap_name.clone(),
            store_type: param.store_type,
            security_level: param.level,
            area: param.area,
            encrypted: param.encrypted,
            data_dir: properties.data_dir.to_string_lossy().into_owned(),
            instance_id: 0,
            uid: ctx.uid,
            token: ctx.token,
        }
    }

    fn on_cloud_sync(&self, event: CloudSyncEvent) {
        let store = event.properties.identity.anonymous();
        let request = SyncRequest::new(event.user, event.properties, event.tables)
            .with_mode(event.mode)
            .with_origin(RequestOrigin::Service)
            .with_callback(move |outcome| match outcome.result {
                Ok(summary) => debug!(
                    request = outcome.request_id,
                    pushed = summary.pushed(),
                    pulled = summary.pulled(),
                    "cloud sync finished"
                ),
                Err(e) => warn!(request = outcome.request_id, error = %e, "cloud sync failed"),
            });
        if let Err(e) = self.scheduler.submit(request) {
            warn!(%store, error = %e, "cloud sync rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::TokenAccessChecker;
    use crate::error::Status;
    use crate::notifier::ChannelNotifier;
    use distdb_codec::{FieldInfo, LogInfo, RowWithLog, StorageType, Value};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    fn ctx(pid: u32) -> ProcessContext {
        ProcessContext::new(pid, 20_000 + pid, 42, 100)
    }

    fn param() -> SyncerParam {
        SyncerParam::new("com.example.notes", "notes.db")
    }

    fn service() -> DataService {
        DataService::builder("device-a").build().unwrap()
    }

    fn seed(service: &DataService, ctx: &ProcessContext) {
        let session = service.session(ctx, &param()).unwrap();
        let conn = session.store().unwrap().acquire().unwrap();
        conn.create_table("notes", &[FieldInfo::new("body", StorageType::Text)])
            .unwrap();
        let log = LogInfo {
            timestamp: 5,
            write_timestamp: 5,
            hash_key: vec![1],
            ..LogInfo::default()
        };
        conn.write("notes", &[RowWithLog::new(vec![Value::from("hi")], log)])
            .unwrap();
    }

    #[test]
    fn blocking_sync_returns_summary() {
        let service = service();
        seed(&service, &ctx(1));
        let option = SyncOption::new(["notes"]).with_wait(WaitPolicy::Block { timeout: WAIT });
        let summary = service.do_sync(&ctx(1), &param(), &option, None).unwrap();
        assert_eq!(summary.pushed(), 1);
    }

    #[test]
    fn async_result_reaches_notifier() {
        let service = service();
        seed(&service, &ctx(1));
        let (notifier, (complete, _)) = ChannelNotifier::new();
        service
            .init_notifier(&ctx(1), &param(), Arc::new(notifier))
            .unwrap();
        let id = service
            .do_async(&ctx(1), &param(), 9, &SyncOption::new(["notes"]), None)
            .unwrap();
        let (seq, outcome) = complete.recv_timeout(WAIT).unwrap();
        assert_eq!(seq, 9);
        assert_eq!(outcome.request_id, id);
        assert!(outcome.result.is_ok());
    }

    #[test]
    fn denied_caller_gets_permission_status() {
        let checker = Arc::new(TokenAccessChecker::new());
        let service = DataService::builder("device-a")
            .with_access_checker(checker.clone())
            .build()
            .unwrap();
        let result = service.session(&ctx(1), &param());
        assert_eq!(Status::of(&result), Status::PermissionDenied);
        checker.grant(42, "com.example.notes");
        assert!(service.session(&ctx(1), &param()).is_ok());
    }

    #[test]
    fn schema_conflict_is_rejected() {
        let service = service();
        let events = service.events().subscribe(EventKind::GetSchema);
        let param = param().with_schema_version(1);
        service.get_schema(&ctx(1), &param).unwrap();
        assert!(matches!(
            events.recv_timeout(WAIT).unwrap(),
            Event::GetSchema(SchemaInfo { schema_version: 1, .. })
        ));

        let changed = param.clone().with_area(2);
        let err = service.get_schema(&ctx(1), &changed).unwrap_err();
        assert!(matches!(err, ServiceError::MetaConflict { .. }));
        assert_eq!(err.status(), Status::Error);
    }

    #[test]
    fn schema_version_minus_one_is_noop() {
        let service = service();
        let events = service.events().subscribe(EventKind::GetSchema);
        service
            .get_schema(&ctx(1), &param().with_schema_version(-1))
            .unwrap();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn auto_launch_matches_identifier() {
        let meta = Arc::new(MemoryMetaStore::new());
        let service = DataService::builder("device-a")
            .with_meta_store(meta.clone())
            .build()
            .unwrap();
        let entry = StoreMetaData {
            device_id: "device-a".into(),
            user: "100".into(),
            bundle_name: "com.example.notes".into(),
            app_id: "com.example.notes".into(),
            store_id: "notes".into(),
            data_dir: "/data/notes".into(),
            encrypted: true,
            ..StoreMetaData::default()
        };
        meta.save_meta(&entry.key(), &entry, false).unwrap();

        let identifier = StoreIdentity::new("100", "com.example.notes", "notes").identifier_hex();
        let resolved = service.resolve_auto_launch(&identifier).unwrap();
        assert_eq!(resolved.store_id, "notes");
        assert_eq!(resolved.cipher, Some(CipherType::Aes256Gcm));
        assert_eq!(resolved.iterations, ENCRYPT_ITERATIONS);

        let other = StoreIdentity::new("101", "com.example.notes", "notes").identifier_hex();
        assert!(matches!(
            service.resolve_auto_launch(&other),
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[test]
    fn initialize_posts_feature_init() {
        let service = service();
        let events = service.events().subscribe(EventKind::FeatureInit);
        service.on_initialize(&ctx(1)).unwrap();
        assert!(matches!(
            events.recv_timeout(WAIT).unwrap(),
            Event::FeatureInit { token: 42 }
        ));
    }

    #[test]
    fn peer_change_notifies_subscriber() {
        let service = service();
        let (notifier, (_, changes)) = ChannelNotifier::new();
        service
            .init_notifier(&ctx(3), &param(), Arc::new(notifier))
            .unwrap();
        service.subscribe(&ctx(3), &param()).unwrap();
        let identity = service.properties(&ctx(3), &param()).identity;
        assert!(service.on_data_change(0, &identity, "peer-b"));
        assert_eq!(
            changes.recv_timeout(WAIT).unwrap(),
            ("notes".to_string(), vec!["peer-b".to_string()])
        );
    }

    #[test]
    fn missing_distributed_table_is_not_found() {
        let service = service();
        let result = service.set_distributed_tables(&ctx(1), &param(), &["ghost".to_string()]);
        assert_eq!(Status::of(&result), Status::NotFound);
    }
}

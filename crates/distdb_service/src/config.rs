//! Service configuration.

use crate::error::ServiceResult;
use distdb_storage::{EnginePoolConfig, StoreCacheConfig};
use distdb_sync::{PoolConfig, RetryPolicy, SchedulerConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Limits of the syncer registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Sessions one process may hold.
    pub max_sessions_per_process: usize,
    /// Sessions across all processes.
    pub max_sessions: usize,
    /// Inactivity window after which a session is evicted.
    pub idle_timeout: Duration,
}

impl RegistryConfig {
    /// Sets the per-process cap.
    pub fn with_max_sessions_per_process(mut self, max: usize) -> Self {
        self.max_sessions_per_process = max;
        self
    }

    /// Sets the global cap.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_process: 10,
            max_sessions: 50,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Configuration of a [`crate::DataService`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Session caps and idle timeout.
    pub registry: RegistryConfig,
    /// Retry policies.
    pub scheduler: SchedulerConfig,
    /// Worker pool sizing.
    pub pool: PoolConfig,
    /// Store open retries.
    pub store_cache: StoreCacheConfig,
    /// Per-store handle pool.
    pub engine_pool: EnginePoolConfig,
    /// How long a blocking sync waits before giving up.
    pub block_timeout: Duration,
}

impl ServiceConfig {
    /// Parses a JSON configuration. Missing keys keep their defaults and
    /// durations are given in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the JSON is malformed or has unknown keys.
    pub fn from_json(json: &str) -> ServiceResult<Self> {
        let file: ConfigFile = serde_json::from_str(json)?;
        Ok(file.into_config())
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Config` if it does not parse.
    pub fn from_file(path: &Path) -> ServiceResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Sets the registry limits.
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the scheduler configuration.
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Sets the worker pool sizing.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the store cache configuration.
    pub fn with_store_cache(mut self, store_cache: StoreCacheConfig) -> Self {
        self.store_cache = store_cache;
        self
    }

    /// Sets the blocking sync timeout.
    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            scheduler: SchedulerConfig::default(),
            pool: PoolConfig::default(),
            store_cache: StoreCacheConfig::default(),
            engine_pool: EnginePoolConfig::default(),
            block_timeout: Duration::from_secs(30),
        }
    }
}

/// On-disk form of [`ServiceConfig`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    workers: Option<usize>,
    max_sessions_per_process: Option<usize>,
    max_sessions: Option<usize>,
    idle_timeout_ms: Option<u64>,
    block_timeout_ms: Option<u64>,
    open_retries: Option<u32>,
    stale_retry_interval_ms: Option<u64>,
    writers: Option<usize>,
    readers: Option<usize>,
    retry: Option<RetryFile>,
    client_retry: Option<RetryFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RetryFile {
    max_attempts: Option<u32>,
    retry_interval_ms: Option<u64>,
    locked_interval_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    max_delay_ms: Option<u64>,
}

impl RetryFile {
    fn apply(self, mut policy: RetryPolicy) -> RetryPolicy {
        if let Some(n) = self.max_attempts {
            policy.max_attempts = n;
        }
        if let Some(ms) = self.retry_interval_ms {
            policy.retry_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.locked_interval_ms {
            policy.locked_interval = Duration::from_millis(ms);
        }
        if let Some(m) = self.backoff_multiplier {
            policy.backoff_multiplier = m;
        }
        if let Some(ms) = self.max_delay_ms {
            policy.max_delay = Duration::from_millis(ms);
        }
        policy
    }
}

impl ConfigFile {
    fn into_config(self) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        let registry = &mut config.registry;
        if let Some(n) = self.max_sessions_per_process {
            registry.max_sessions_per_process = n;
        }
        if let Some(n) = self.max_sessions {
            registry.max_sessions = n;
        }
        if let Some(ms) = self.idle_timeout_ms {
            registry.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.block_timeout_ms {
            config.block_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = self.workers {
            config.pool.workers = n;
        }
        if let Some(n) = self.open_retries {
            config.store_cache.open_retries = n;
        }
        if let Some(ms) = self.stale_retry_interval_ms {
            config.store_cache.stale_retry_interval = Duration::from_millis(ms);
        }
        if let Some(n) = self.writers {
            config.engine_pool.writers = n;
        }
        if let Some(n) = self.readers {
            config.engine_pool.readers = n;
        }
        if let Some(retry) = self.retry {
            config.scheduler.retry = retry.apply(config.scheduler.retry);
        }
        if let Some(retry) = self.client_retry {
            config.scheduler.client_retry = retry.apply(config.scheduler.client_retry);
        }
        config
    }
}

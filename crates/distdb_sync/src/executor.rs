//! Bounded worker pool with delayed, removable tasks.

use crate::config::PoolConfig;
use crate::error::{SyncError, SyncResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Handle to a scheduled task.
pub type TaskId = u64;

struct PoolInner {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    tasks: DashMap<TaskId, AbortHandle>,
    next_id: AtomicU64,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

/// Runs blocking jobs on a fixed number of workers, optionally after a
/// delay.
///
/// A scheduled job can be removed until its delay has elapsed and a worker
/// has picked it up; after that it always runs to completion. Jobs never
/// run on the caller's thread.
#[derive(Clone)]
pub struct ExecutorPool {
    inner: Arc<PoolInner>,
}

impl ExecutorPool {
    /// Starts a pool with `config.workers` workers.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` if the worker threads cannot be started.
    pub fn new(config: PoolConfig) -> SyncResult<Self> {
        let workers = config.workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .max_blocking_threads(workers)
            .thread_name("distdb-sync")
            .enable_time()
            .build()
            .map_err(|e| SyncError::resource_exhausted(format!("worker pool: {e}")))?;
        let handle = runtime.handle().clone();
        debug!(workers, "executor pool started");
        Ok(Self {
            inner: Arc::new(PoolInner {
                runtime: Mutex::new(Some(runtime)),
                handle,
                tasks: DashMap::new(),
                next_id: AtomicU64::new(0),
                permits: Arc::new(Semaphore::new(workers)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Runs `job` as soon as a worker is free.
    pub fn execute<F>(&self, job: F) -> TaskId
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(Duration::ZERO, job)
    }

    /// Runs `job` after `delay`.
    pub fn schedule<F>(&self, delay: Duration, job: F) -> TaskId
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = &self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        if inner.closed.load(Ordering::Acquire) {
            warn!(task = id, "executor pool is shut down, job dropped");
            return id;
        }
        let pool = Arc::downgrade(inner);
        let permits = Arc::clone(&inner.permits);

        // The entry stays locked until the abort handle is stored, so the
        // task cannot claim itself before it is registered.
        if let Entry::Vacant(slot) = inner.tasks.entry(id) {
            let task = inner.handle.spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let claimed = pool
                    .upgrade()
                    .is_some_and(|pool| pool.tasks.remove(&id).is_some());
                if !claimed {
                    return;
                }
                if let Err(e) = tokio::task::spawn_blocking(job).await {
                    warn!(task = id, error = %e, "scheduled job failed");
                }
            });
            slot.insert(task.abort_handle());
        }
        id
    }

    /// Removes a task that has not started. Returns true if the job will
    /// not run.
    pub fn remove(&self, id: TaskId) -> bool {
        match self.inner.tasks.remove(&id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Tasks scheduled but not yet started.
    pub fn pending(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Stops accepting jobs and abandons pending ones.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let keys: Vec<TaskId> = self.inner.tasks.iter().map(|e| *e.key()).collect();
        for id in keys {
            self.remove(id);
        }
        if let Some(runtime) = self.inner.runtime.lock().take() {
            runtime.shutdown_background();
        }
        debug!("executor pool shut down");
    }
}

//! Configuration for the sync scheduler.

use crate::error::SyncError;
use std::time::Duration;

/// Retry behavior for failed sync attempts.
///
/// The delay before retry `n` (1-based) is
/// `base * backoff_multiplier^(n-1)`, capped at `max_delay`, where `base`
/// is `locked_interval` when the store was locked and `retry_interval`
/// otherwise. Delays never shrink for a given error class.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Base delay for ordinary transient errors.
    pub retry_interval: Duration,
    /// Base delay when the store was locked.
    pub locked_interval: Duration,
    /// Growth factor between consecutive retries.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Attempts for service-initiated syncs.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;
    /// Attempts for client-initiated syncs.
    pub const CLIENT_MAX_ATTEMPTS: u32 = 3;

    /// Creates a policy with `max_attempts` and default intervals.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            retry_interval: Duration::from_secs(10),
            locked_interval: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }

    /// Policy applied to client-initiated requests.
    pub fn client() -> Self {
        Self::new(Self::CLIENT_MAX_ATTEMPTS)
    }

    /// Creates a policy with no retries.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Sets the attempt cap.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the ordinary retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Sets the locked-store retry interval.
    pub fn with_locked_interval(mut self, interval: Duration) -> Self {
        self.locked_interval = interval;
        self
    }

    /// Sets the backoff multiplier. Values below 1.0 are treated as 1.0.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Returns true if another attempt is allowed after `attempts` tries.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before retry number `retry` (1-based) after `error`.
    pub fn delay_for(&self, retry: u32, error: &SyncError) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let base = if error.is_locked() {
            self.locked_interval
        } else {
            self.retry_interval
        };
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let secs = base.as_secs_f64() * self.backoff_multiplier.max(1.0).powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Threads executing sync attempts and timer callbacks.
    pub workers: usize,
}

impl PoolConfig {
    /// Sets the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Policy for service-initiated requests.
    pub retry: RetryPolicy,
    /// Policy for client-initiated requests.
    pub client_retry: RetryPolicy,
}

impl SchedulerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            retry: RetryPolicy::default(),
            client_retry: RetryPolicy::client(),
        }
    }

    /// Sets the service retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the client retry policy.
    pub fn with_client_retry(mut self, retry: RetryPolicy) -> Self {
        self.client_retry = retry;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

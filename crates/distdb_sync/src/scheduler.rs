//! Deduplicating sync task scheduler.
//!
//! Requests are grouped by [`DedupKey`]. Each key has at most one current
//! group and one group queued behind it:
//!
//! ```text
//! Queued --worker--> Executing --ok/permanent/cap--> done (callbacks fire)
//!                        |
//!                        +--transient--> Retrying --timer--> Executing
//! ```
//!
//! A request whose key matches a `Queued` or `Retrying` group is merged
//! into it. A request whose key matches an `Executing` group joins the
//! group behind it, which is scheduled when the current one finishes.

use crate::config::{RetryPolicy, SchedulerConfig};
use crate::error::{SyncError, SyncResult};
use crate::executor::{ExecutorPool, TaskId};
use crate::request::{
    make_request_id, request_user, DedupKey, RequestId, RequestOrigin, SyncCallback,
    SyncOutcome, SyncPlan, SyncRequest, SyncSummary,
};
use crate::runner::SyncRunner;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which requests [`SyncScheduler::cancel`] affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFilter {
    /// Every request.
    All,
    /// Requests submitted by this user.
    User(u32),
    /// Requests carrying this owner marker.
    Owner(u64),
}

impl UserFilter {
    fn matches(self, id: RequestId, owner: u64) -> bool {
        match self {
            UserFilter::All => true,
            UserFilter::User(user) => request_user(id) == user,
            UserFilter::Owner(o) => owner == o,
        }
    }
}

/// Where a live request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Waiting for a worker.
    Queued,
    /// An attempt is running.
    Executing,
    /// Waiting for the retry timer.
    Retrying,
}

struct Member {
    id: RequestId,
    owner: u64,
    // Only taken once the member is owned again; the lock makes the slot
    // map shareable across workers.
    callback: Mutex<Option<SyncCallback>>,
    cancelled: bool,
}

struct TaskGroup {
    group_id: u64,
    plan: SyncPlan,
    policy: RetryPolicy,
    members: Vec<Member>,
    state: RequestState,
    attempts: u32,
    task: Option<TaskId>,
}

impl TaskGroup {
    fn all_cancelled(&self) -> bool {
        self.members.iter().all(|m| m.cancelled)
    }
}

#[derive(Default)]
struct KeySlot {
    current: Option<TaskGroup>,
    waiting: Option<TaskGroup>,
}

impl KeySlot {
    fn is_idle(&self) -> bool {
        self.current.is_none() && self.waiting.is_none()
    }
}

struct ActiveEntry {
    key: DedupKey,
    owner: u64,
}

type Deliveries = Vec<(SyncCallback, SyncOutcome)>;

struct SchedulerInner {
    executor: ExecutorPool,
    runner: Arc<dyn SyncRunner>,
    config: SchedulerConfig,
    next_request: AtomicU32,
    next_group: AtomicU64,
    slots: DashMap<DedupKey, KeySlot>,
    active: DashMap<RequestId, ActiveEntry>,
    // Held shared for a whole submit, so shutdown's cancel sees every
    // request accepted before the flag was set.
    closed: RwLock<bool>,
}

/// Accepts sync requests, merges duplicates, runs them on an
/// [`ExecutorPool`] and retries transient failures.
///
/// Submitting never blocks on sync I/O. Every request's callback fires
/// exactly once, outside the scheduler's locks; merged callbacks fire in
/// merge order with the same result.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

impl SyncScheduler {
    /// Creates a scheduler running attempts through `runner`.
    pub fn new(
        executor: ExecutorPool,
        runner: Arc<dyn SyncRunner>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                executor,
                runner,
                config,
                next_request: AtomicU32::new(0),
                next_group: AtomicU64::new(0),
                slots: DashMap::new(),
                active: DashMap::new(),
                closed: RwLock::new(false),
            }),
        }
    }

    /// Accepts a request and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the request fails validation, or
    /// `Cancelled` once the scheduler is shut down. The callback is not
    /// called in either case.
    pub fn submit(&self, mut request: SyncRequest) -> SyncResult<RequestId> {
        request.validate()?;
        let inner = &self.inner;
        let closed = inner.closed.read();
        if *closed {
            warn!(
                store = %request.identity().anonymous(),
                "scheduler is shut down, request rejected"
            );
            return Err(SyncError::Cancelled);
        }
        let counter = inner
            .next_request
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1);
        let id = make_request_id(request.user, counter);
        let key = request.key();
        let member = Member {
            id,
            owner: request.owner,
            callback: Mutex::new(request.take_callback()),
            cancelled: false,
        };
        inner.active.insert(
            id,
            ActiveEntry {
                key: key.clone(),
                owner: request.owner,
            },
        );

        let mut slot = inner.slots.entry(key.clone()).or_default();
        match slot.current.as_mut() {
            None => {
                let mut group = inner.new_group(&request);
                group.members.push(member);
                group.task = Some(schedule_group(inner, key, group.group_id, Duration::ZERO));
                debug!(request = id, store = %request.identity().anonymous(), "sync task queued");
                slot.current = Some(group);
            }
            Some(group) if group.state != RequestState::Executing && !group.all_cancelled() => {
                debug!(request = id, into = group.members[0].id, "sync request merged");
                group.members.push(member);
            }
            Some(_) => {
                let waiting = slot
                    .waiting
                    .get_or_insert_with(|| inner.new_group(&request));
                debug!(request = id, "sync request queued behind running task");
                waiting.members.push(member);
            }
        }
        Ok(id)
    }

    /// Cancels every live request matching `filter`. Returns how many were
    /// newly cancelled.
    ///
    /// Queued and retrying requests are dropped at once and their callbacks
    /// get `Cancelled`. A request whose attempt is already running is not
    /// interrupted and will not be retried; its callback fires when the
    /// attempt ends. Cancelling a finished request is a no-op.
    pub fn cancel(&self, filter: UserFilter) -> usize {
        let inner = &self.inner;
        let keys: BTreeSet<DedupKey> = inner
            .active
            .iter()
            .filter(|e| filter.matches(*e.key(), e.value().owner))
            .map(|e| e.value().key.clone())
            .collect();

        let mut count = 0;
        let mut out = Deliveries::new();
        for key in keys {
            if let Some(mut guard) = inner.slots.get_mut(&key) {
                let slot = &mut *guard;
                if let Some(group) = slot.current.as_mut() {
                    if group.state == RequestState::Executing {
                        for m in group
                            .members
                            .iter_mut()
                            .filter(|m| !m.cancelled && filter.matches(m.id, m.owner))
                        {
                            m.cancelled = true;
                            count += 1;
                        }
                    } else {
                        count += inner.drain_matching(group, filter, &mut out);
                        if group.members.is_empty() {
                            if let Some(task) = group.task.take() {
                                inner.executor.remove(task);
                            }
                            slot.current = None;
                        }
                    }
                }
                if let Some(waiting) = slot.waiting.as_mut() {
                    count += inner.drain_matching(waiting, filter, &mut out);
                    if waiting.members.is_empty() {
                        slot.waiting = None;
                    }
                }
                if slot.current.is_none() {
                    inner.promote_waiting(&key, slot);
                }
            }
            inner.slots.remove_if(&key, |_, slot| slot.is_idle());
        }

        if count > 0 {
            info!(?filter, count, "sync requests cancelled");
        }
        deliver(out);
        count
    }

    /// State of a live request, or `None` once it has finished.
    pub fn status(&self, id: RequestId) -> Option<RequestState> {
        let key = self.inner.active.get(&id)?.key.clone();
        let slot = self.inner.slots.get(&key)?;
        let holds = |g: &TaskGroup| g.members.iter().any(|m| m.id == id);
        if let Some(group) = slot.current.as_ref().filter(|g| holds(g)) {
            return Some(group.state);
        }
        slot.waiting
            .as_ref()
            .filter(|g| holds(g))
            .map(|_| RequestState::Queued)
    }

    /// Number of requests not yet finished.
    pub fn active_requests(&self) -> usize {
        self.inner.active.len()
    }

    /// Rejects further requests, cancels everything and stops the worker
    /// pool.
    pub fn shutdown(&self) {
        *self.inner.closed.write() = true;
        self.cancel(UserFilter::All);
        self.inner.executor.shutdown();
    }
}

impl SchedulerInner {
    fn new_group(&self, request: &SyncRequest) -> TaskGroup {
        let policy = match request.origin {
            RequestOrigin::Service => self.config.retry.clone(),
            RequestOrigin::Client => self.config.client_retry.clone(),
        };
        TaskGroup {
            group_id: self.next_group.fetch_add(1, Ordering::Relaxed) + 1,
            plan: SyncPlan::from_request(request),
            policy,
            members: Vec::new(),
            state: RequestState::Queued,
            attempts: 0,
            task: None,
        }
    }

    /// Removes members matching `filter`, queuing `Cancelled` for each.
    fn drain_matching(
        &self,
        group: &mut TaskGroup,
        filter: UserFilter,
        out: &mut Deliveries,
    ) -> usize {
        let (cancelled, kept): (Vec<Member>, Vec<Member>) = std::mem::take(&mut group.members)
            .into_iter()
            .partition(|m| filter.matches(m.id, m.owner));
        group.members = kept;
        let count = cancelled.len();
        for member in cancelled {
            self.finish_member(member, Err(SyncError::Cancelled), out);
        }
        count
    }

    fn finish_member(&self, member: Member, result: SyncResult<SyncSummary>, out: &mut Deliveries) {
        self.active.remove(&member.id);
        if let Some(callback) = member.callback.into_inner() {
            out.push((
                callback,
                SyncOutcome {
                    request_id: member.id,
                    result,
                },
            ));
        }
    }

    fn promote_waiting(self: &Arc<Self>, key: &DedupKey, slot: &mut KeySlot) {
        if let Some(mut next) = slot.waiting.take() {
            next.state = RequestState::Queued;
            next.task = Some(schedule_group(self, key.clone(), next.group_id, Duration::ZERO));
            slot.current = Some(next);
        }
    }

    fn run_group(self: &Arc<Self>, key: DedupKey, group_id: u64) {
        let plan = {
            let Some(mut slot) = self.slots.get_mut(&key) else {
                return;
            };
            let Some(group) = slot.current.as_mut().filter(|g| g.group_id == group_id) else {
                return;
            };
            if group.state == RequestState::Executing {
                return;
            }
            group.state = RequestState::Executing;
            group.task = None;
            group.attempts += 1;
            let mut plan = group.plan.clone();
            plan.attempt = group.attempts;
            plan
        };

        debug!(
            store = %plan.properties.identity.anonymous(),
            attempt = plan.attempt,
            "sync attempt started"
        );
        let result = self.runner.run(&plan);
        let out = self.finish_attempt(&key, group_id, result);
        self.slots.remove_if(&key, |_, slot| slot.is_idle());
        deliver(out);
    }

    fn finish_attempt(
        self: &Arc<Self>,
        key: &DedupKey,
        group_id: u64,
        result: SyncResult<SyncSummary>,
    ) -> Deliveries {
        let mut out = Deliveries::new();
        let Some(mut guard) = self.slots.get_mut(key) else {
            return out;
        };
        let slot = &mut *guard;
        let Some(group) = slot.current.as_mut() else {
            return out;
        };
        if group.group_id != group_id {
            return out;
        }

        if let Err(err) = &result {
            if err.is_retryable()
                && !group.all_cancelled()
                && group.policy.allows_retry(group.attempts)
            {
                let (cancelled, kept): (Vec<Member>, Vec<Member>) =
                    std::mem::take(&mut group.members)
                        .into_iter()
                        .partition(|m| m.cancelled);
                group.members = kept;
                for member in cancelled {
                    self.finish_member(member, Err(SyncError::Cancelled), &mut out);
                }
                let delay = group.policy.delay_for(group.attempts, err);
                group.state = RequestState::Retrying;
                group.task = Some(schedule_group(self, key.clone(), group_id, delay));
                warn!(
                    store = %key.identity.anonymous(),
                    attempt = group.attempts,
                    ?delay,
                    error = %err,
                    "sync attempt failed, retrying"
                );
                return out;
            }
        }

        let Some(group) = slot.current.take() else {
            return out;
        };
        match &result {
            Ok(_) => info!(
                store = %key.identity.anonymous(),
                attempts = group.attempts,
                "sync completed"
            ),
            Err(e) => warn!(
                store = %key.identity.anonymous(),
                attempts = group.attempts,
                error = %e,
                "sync failed"
            ),
        }
        for member in group.members {
            let member_result = if member.cancelled && result.is_err() {
                Err(SyncError::Cancelled)
            } else {
                result.clone()
            };
            self.finish_member(member, member_result, &mut out);
        }
        self.promote_waiting(key, slot);
        out
    }
}

fn schedule_group(
    inner: &Arc<SchedulerInner>,
    key: DedupKey,
    group_id: u64,
    delay: Duration,
) -> TaskId {
    let weak: Weak<SchedulerInner> = Arc::downgrade(inner);
    inner.executor.schedule(delay, move || {
        if let Some(inner) = weak.upgrade() {
            inner.run_group(key, group_id);
        }
    })
}

fn deliver(out: Deliveries) {
    for (callback, outcome) in out {
        callback(outcome);
    }
}

//! FIFO job queue drained by one background worker thread.
//!
//! State lives behind a single `parking_lot::Mutex` paired with a `Condvar`
//! that wakes the worker. The busy flag is republished into a
//! `tokio::sync::watch` channel while that mutex is held, so the channel value
//! always matches the queue state at the moment the lock was released and a
//! waiter that subscribes before checking can never miss the final idle flip.
//!
//! Tag cancellation uses per-tag generation counters: a tagged job remembers
//! the generation of its tag at submit time and is skipped at dequeue if the
//! tag has been cancelled since.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};
use wayfarer_core::ScriptError;
use wayfarer_settings::SchedulerSettings;

use crate::errors::SchedulerError;
use crate::job::{BusyListener, FaultHandler, Job, JobAction, JobFault, JobId};

/// Worker tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Pause between consecutive jobs of a backlog.
    pub yield_delay: Duration,
    /// Keep draining after a job completes. When false the worker sleeps after
    /// every job until the next wake.
    pub continue_on_completion: bool,
    /// Name of the worker thread.
    pub thread_name: String,
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            yield_delay: settings.yield_delay(),
            continue_on_completion: settings.continue_on_completion,
            thread_name: settings.worker_thread_name.clone(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct QueueState {
    queue: VecDeque<Job>,
    generations: HashMap<String, u64>,
    next_id: u64,
    active: bool,
    running: bool,
    wake_pending: bool,
    idle_waiters: usize,
    disposed: bool,
    worker_started: bool,
    published_busy: bool,
}

impl QueueState {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            generations: HashMap::new(),
            next_id: 0,
            active: true,
            running: false,
            wake_pending: false,
            idle_waiters: 0,
            disposed: false,
            worker_started: false,
            published_busy: false,
        }
    }

    fn is_busy(&self) -> bool {
        !self.disposed && (self.running || (self.active && !self.queue.is_empty()))
    }

    fn generation(&self, tag: &str) -> u64 {
        self.generations.get(tag).copied().unwrap_or(0)
    }

    fn is_stale(&self, job: &Job) -> bool {
        job.tag
            .as_deref()
            .is_some_and(|tag| self.generation(tag) > job.generation)
    }

    fn enqueue(&mut self, action: JobAction, tag: Option<&str>) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        let generation = tag.map_or(0, |t| self.generation(t));
        self.queue.push_back(Job {
            id,
            tag: tag.map(str::to_owned),
            generation,
            action,
        });
        id
    }

    /// Invalidate every queued job under `tag`. Returns how many were pending.
    fn cancel(&mut self, tag: &str) -> usize {
        let stale_before = self.queue.iter().filter(|j| self.is_stale(j)).count();
        *self.generations.entry(tag.to_owned()).or_insert(0) += 1;
        let stale_after = self.queue.iter().filter(|j| self.is_stale(j)).count();
        stale_after - stale_before
    }

    fn pop_runnable(&mut self) -> Option<Job> {
        while let Some(job) = self.queue.pop_front() {
            if self.is_stale(&job) {
                trace!(job = %job.id, tag = ?job.tag, "skipping cancelled job");
                continue;
            }
            return Some(job);
        }
        None
    }
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Condvar,
    busy_tx: watch::Sender<bool>,
    fault_handler: RwLock<Option<FaultHandler>>,
    busy_listener: RwLock<Option<BusyListener>>,
    worker_id: OnceLock<ThreadId>,
    config: SchedulerConfig,
}

impl Shared {
    /// Republish the busy flag if it changed. Must be called with the state
    /// lock held; the returned change is for [`Shared::notify_busy`] after
    /// the lock is released.
    fn publish(&self, state: &mut MutexGuard<'_, QueueState>) -> Option<bool> {
        let busy = state.is_busy();
        if busy == state.published_busy {
            return None;
        }
        state.published_busy = busy;
        let _ = self.busy_tx.send_replace(busy);
        Some(busy)
    }

    fn notify_busy(&self, change: Option<bool>) {
        let Some(busy) = change else { return };
        trace!(busy, "scheduler busy changed");
        let listener = self.busy_listener.read().clone();
        if let Some(listener) = listener {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(busy))) {
                error!(busy, panic = %panic_message(payload.as_ref()), "busy listener panicked");
            }
        }
    }

    fn report_fault(&self, fault: &JobFault) {
        error!(
            job = %fault.job,
            tag = ?fault.tag,
            category = fault.error.category(),
            error = %fault.error,
            "job failed"
        );
        let handler = self.fault_handler.read().clone();
        if let Some(handler) = handler {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(fault))) {
                error!(
                    job = %fault.job,
                    panic = %panic_message(payload.as_ref()),
                    "fault handler panicked"
                );
            }
        }
    }

    fn is_worker_thread(&self) -> bool {
        self.worker_id
            .get()
            .is_some_and(|id| *id == thread::current().id())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JobScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Thread-safe FIFO job queue with a single lazily started worker.
pub struct JobScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Create an active, empty scheduler. No thread is started until the first
    /// submit.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        let (busy_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::new()),
                wake: Condvar::new(),
                busy_tx,
                fault_handler: RwLock::new(None),
                busy_listener: RwLock::new(None),
                worker_id: OnceLock::new(),
                config,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Worker configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Append a job to the tail of the queue.
    ///
    /// With `wake` the worker is signalled immediately; otherwise the job is
    /// picked up at the next wake.
    pub fn submit<F>(
        &self,
        action: F,
        tag: Option<&str>,
        wake: bool,
    ) -> Result<JobId, SchedulerError>
    where
        F: FnOnce() -> Result<(), ScriptError> + Send + 'static,
    {
        self.enqueue(Box::new(action), tag, wake, false)
    }

    /// Cancel every queued job under `tag`, then submit `action` under it.
    ///
    /// Both steps happen under one lock, so concurrent callers leave at most
    /// one pending job for the tag.
    pub fn submit_unique<F>(
        &self,
        action: F,
        tag: &str,
        wake: bool,
    ) -> Result<JobId, SchedulerError>
    where
        F: FnOnce() -> Result<(), ScriptError> + Send + 'static,
    {
        self.enqueue(Box::new(action), Some(tag), wake, true)
    }

    fn enqueue(
        &self,
        action: JobAction,
        tag: Option<&str>,
        wake: bool,
        replace: bool,
    ) -> Result<JobId, SchedulerError> {
        let (id, cancelled, spawn, change) = {
            let mut state = self.shared.state.lock();
            if state.disposed {
                return Err(SchedulerError::Disposed);
            }
            let cancelled = match (replace, tag) {
                (true, Some(tag)) => state.cancel(tag),
                _ => 0,
            };
            let id = state.enqueue(action, tag);
            if wake {
                state.wake_pending = true;
            }
            let spawn = !state.worker_started;
            state.worker_started = true;
            let change = self.shared.publish(&mut state);
            (id, cancelled, spawn, change)
        };

        if spawn {
            if let Err(e) = self.spawn_worker() {
                self.shared.state.lock().worker_started = false;
                return Err(e);
            }
        }
        if wake {
            self.shared.wake.notify_one();
        }
        self.shared.notify_busy(change);
        debug!(job = %id, tag, wake, cancelled, "job submitted");
        Ok(id)
    }

    fn spawn_worker(&self) -> Result<(), SchedulerError> {
        let shared = Arc::clone(&self.shared);
        let dispatch = tracing::dispatcher::get_default(Clone::clone);
        let handle = thread::Builder::new()
            .name(self.shared.config.thread_name.clone())
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || run_worker(&shared));
            })?;
        debug!(thread = %self.shared.config.thread_name, "worker thread started");
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Skip every job currently queued under `tag`. Jobs submitted afterwards
    /// with the same tag still run. Returns how many queued jobs were
    /// cancelled.
    pub fn cancel_tag(&self, tag: &str) -> usize {
        let cancelled = self.shared.state.lock().cancel(tag);
        debug!(tag, cancelled, "tag cancelled");
        cancelled
    }

    /// Pause or resume processing without discarding queued jobs.
    pub fn set_active(&self, active: bool) {
        let change = {
            let mut state = self.shared.state.lock();
            if state.active == active {
                return;
            }
            state.active = active;
            if active {
                state.wake_pending = true;
            }
            self.shared.publish(&mut state)
        };
        if active {
            self.shared.wake.notify_one();
        }
        self.shared.notify_busy(change);
        debug!(active, "scheduler activity changed");
    }

    /// Whether processing is enabled.
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    /// True iff a job is executing, or runnable work is queued while active,
    /// and the scheduler is not disposed.
    pub fn is_busy(&self) -> bool {
        self.shared.state.lock().is_busy()
    }

    /// Queued jobs that will still run.
    pub fn pending(&self) -> usize {
        let state = self.shared.state.lock();
        state.queue.iter().filter(|j| !state.is_stale(j)).count()
    }

    /// Whether [`JobScheduler::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.shared.state.lock().disposed
    }

    /// Whether the calling thread is this scheduler's worker.
    pub fn is_worker_thread(&self) -> bool {
        self.shared.is_worker_thread()
    }

    /// Observe the busy flag. The receiver starts at the current value.
    pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
        self.shared.busy_tx.subscribe()
    }

    /// Route job failures to `handler`. Replaces any previous handler.
    pub fn set_fault_handler(&self, handler: FaultHandler) {
        *self.shared.fault_handler.write() = Some(handler);
    }

    /// Call `listener` on every busy/idle flip. Replaces any previous listener.
    pub fn set_busy_listener(&self, listener: BusyListener) {
        *self.shared.busy_listener.write() = Some(listener);
    }

    /// Block until no job is queued or executing.
    ///
    /// Wakes the worker for jobs submitted without `wake`. Returns at once
    /// when paused with work queued, and after disposal.
    pub fn wait_until_idle(&self) -> Result<(), SchedulerError> {
        if self.shared.is_worker_thread() {
            return Err(SchedulerError::CalledFromWorker);
        }

        let mut rx = self.shared.busy_tx.subscribe();
        let (woke, change) = {
            let mut state = self.shared.state.lock();
            if !state.is_busy() {
                return Ok(());
            }
            state.idle_waiters += 1;
            let woke = state.active && !state.queue.is_empty() && !state.wake_pending;
            state.wake_pending |= woke;
            (woke, self.shared.publish(&mut state))
        };
        if woke {
            self.shared.wake.notify_one();
        }
        self.shared.notify_busy(change);

        trace!("waiting for scheduler to become idle");
        let result = futures::executor::block_on(rx.wait_for(|busy| !*busy))
            .map(drop)
            .map_err(|_| SchedulerError::Disposed);
        self.shared.state.lock().idle_waiters -= 1;
        result
    }

    /// Drop queued jobs, stop the worker and join it.
    ///
    /// Idempotent. A job currently executing finishes first. When called from
    /// the worker thread itself the thread is detached instead of joined.
    pub fn dispose(&self) {
        let change = {
            let mut state = self.shared.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            let dropped = state.queue.len();
            state.queue.clear();
            debug!(dropped, "scheduler disposed");
            self.shared.publish(&mut state)
        };
        self.shared.wake.notify_all();
        self.shared.notify_busy(change);

        let handle = self.worker.lock().take();
        let Some(handle) = handle else { return };
        if handle.thread().id() == thread::current().id() {
            debug!("dispose called on worker thread, detaching");
        } else if handle.join().is_err() {
            warn!("worker thread terminated abnormally");
        }
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("JobScheduler")
            .field("queued", &state.queue.len())
            .field("active", &state.active)
            .field("running", &state.running)
            .field("disposed", &state.disposed)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────────────────

fn run_worker(shared: &Shared) {
    let _ = shared.worker_id.set(thread::current().id());
    let config = &shared.config;

    loop {
        let (job, change) = {
            let mut state = shared.state.lock();
            let job = loop {
                if state.disposed {
                    trace!("worker exiting");
                    return;
                }
                if state.active && state.wake_pending {
                    if let Some(job) = state.pop_runnable() {
                        break job;
                    }
                    state.wake_pending = false;
                }
                // Skipped stale jobs may have emptied the queue.
                let change = shared.publish(&mut state);
                if change.is_some() {
                    MutexGuard::unlocked(&mut state, || shared.notify_busy(change));
                    continue;
                }
                shared.wake.wait(&mut state);
            };
            state.running = true;
            (job, shared.publish(&mut state))
        };
        shared.notify_busy(change);

        let Job { id, tag, action, .. } = job;
        trace!(job = %id, tag = ?tag, "running job");
        let outcome = panic::catch_unwind(AssertUnwindSafe(action))
            .unwrap_or_else(|payload| Err(ScriptError::Panic(panic_message(payload.as_ref()))));
        if let Err(error) = outcome {
            shared.report_fault(&JobFault {
                job: id,
                tag,
                error,
            });
        }

        let (backlog, change) = {
            let mut state = shared.state.lock();
            state.running = false;
            if !config.continue_on_completion && state.idle_waiters == 0 {
                state.wake_pending = false;
            }
            let backlog = state.active && state.wake_pending && !state.queue.is_empty();
            (backlog, shared.publish(&mut state))
        };
        shared.notify_busy(change);

        if backlog && !config.yield_delay.is_zero() {
            let mut state = shared.state.lock();
            let _ = shared
                .wake
                .wait_while_for(&mut state, |s| !s.disposed, config.yield_delay);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panicked".to_owned())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

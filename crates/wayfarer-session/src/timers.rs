//! Script timers on a private tokio runtime.
//!
//! Each armed timer is one `sleep_until` task; stopping, suspending or
//! restarting a timer aborts its task. While the session is paused a timer
//! keeps only the time it had left. A timer whose deadline does not fit in an
//! [`Instant`] is held without a task and never fires.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{self, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::instrument::WithSubscriber;
use tracing::{debug, trace};
use wayfarer_core::ObjectRef;

/// Called with the timer object when its deadline passes.
pub(crate) type ElapsedCallback = Arc<dyn Fn(ObjectRef) + Send + Sync>;

#[derive(Debug)]
enum Timer {
    Armed {
        deadline: Option<Instant>,
        task: Option<JoinHandle<()>>,
    },
    Suspended(Duration),
}

impl Timer {
    fn remaining(&self, now: Instant) -> Duration {
        match self {
            Self::Armed {
                deadline: Some(deadline),
                ..
            } => deadline.saturating_duration_since(now),
            Self::Armed { deadline: None, .. } => Duration::MAX,
            Self::Suspended(remaining) => *remaining,
        }
    }

    fn abort(&self) {
        if let Self::Armed { task: Some(task), .. } = self {
            task.abort();
        }
    }
}

#[derive(Debug)]
struct Entry {
    generation: u64,
    timer: Timer,
}

#[derive(Default)]
struct TimerState {
    timers: HashMap<ObjectRef, Entry>,
    next_generation: u64,
    suspended: bool,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    on_elapsed: ElapsedCallback,
}

impl Shared {
    /// Arm a timer for `remaining` from now under a fresh generation, so a
    /// task from an earlier arming can never fire it.
    fn arm(
        self: &Arc<Self>,
        state: &mut TimerState,
        handle: &Handle,
        object: ObjectRef,
        remaining: Duration,
    ) -> Entry {
        state.next_generation += 1;
        let generation = state.next_generation;
        let deadline = Instant::now().checked_add(remaining);
        let task = deadline.map(|deadline| {
            let shared = Arc::clone(self);
            handle.spawn(
                async move {
                    tokio::time::sleep_until(deadline).await;
                    shared.fire(object, generation);
                }
                .with_current_subscriber(),
            )
        });
        if deadline.is_none() {
            debug!(%object, ?remaining, "timer deadline out of range, never fires");
        }
        Entry {
            generation,
            timer: Timer::Armed { deadline, task },
        }
    }

    fn fire(&self, object: ObjectRef, generation: u64) {
        let due = {
            let mut state = self.state.lock();
            let current = state.timers.get(&object).is_some_and(|entry| {
                entry.generation == generation && matches!(entry.timer, Timer::Armed { .. })
            });
            if current {
                let _ = state.timers.remove(&object);
            }
            current
        };
        if due {
            trace!(%object, "timer elapsed");
            (self.on_elapsed)(object);
        }
    }
}

pub(crate) struct TimerService {
    shared: Arc<Shared>,
    runtime: Mutex<Option<Runtime>>,
    thread_name: String,
}

impl TimerService {
    pub(crate) fn new(thread_name: impl Into<String>, on_elapsed: ElapsedCallback) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TimerState::default()),
                on_elapsed,
            }),
            runtime: Mutex::new(None),
            thread_name: thread_name.into(),
        }
    }

    /// Handle of the timer runtime, started on first use.
    fn handle(&self) -> io::Result<Handle> {
        let mut runtime = self.runtime.lock();
        if let Some(runtime) = runtime.as_ref() {
            return Ok(runtime.handle().clone());
        }
        let started = runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(self.thread_name.clone())
            .enable_time()
            .build()?;
        let handle = started.handle().clone();
        *runtime = Some(started);
        debug!(thread = %self.thread_name, "timer runtime started");
        Ok(handle)
    }

    /// Start or restart the timer of `object`.
    pub(crate) fn start(&self, object: ObjectRef, duration: Duration) -> io::Result<()> {
        if self.shared.state.lock().shutdown {
            return Ok(());
        }
        let handle = self.handle()?;

        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Ok(());
        }
        let entry = if state.suspended {
            state.next_generation += 1;
            Entry {
                generation: state.next_generation,
                timer: Timer::Suspended(duration),
            }
        } else {
            self.shared.arm(&mut state, &handle, object, duration)
        };
        if let Some(previous) = state.timers.insert(object, entry) {
            previous.timer.abort();
        }
        debug!(%object, ?duration, "timer started");
        Ok(())
    }

    /// Cancel the timer of `object`. Returns whether it was running.
    pub(crate) fn stop(&self, object: ObjectRef) -> bool {
        let removed = self.shared.state.lock().timers.remove(&object);
        match removed {
            Some(entry) => {
                entry.timer.abort();
                debug!(%object, "timer stopped");
                true
            }
            None => false,
        }
    }

    /// Freeze every timer, keeping its remaining time.
    pub(crate) fn suspend_all(&self) {
        let mut state = self.shared.state.lock();
        state.suspended = true;
        let now = Instant::now();
        for entry in state.timers.values_mut() {
            if matches!(entry.timer, Timer::Armed { .. }) {
                entry.timer.abort();
                entry.timer = Timer::Suspended(entry.timer.remaining(now));
            }
        }
        trace!(timers = state.timers.len(), "timers suspended");
    }

    /// Re-arm suspended timers with their remaining time.
    pub(crate) fn resume_all(&self) {
        let handle = self.runtime.lock().as_ref().map(|rt| rt.handle().clone());
        let mut state = self.shared.state.lock();
        state.suspended = false;
        let Some(handle) = handle else { return };

        let suspended: Vec<(ObjectRef, Duration)> = state
            .timers
            .iter()
            .filter_map(|(object, entry)| match entry.timer {
                Timer::Suspended(remaining) => Some((*object, remaining)),
                Timer::Armed { .. } => None,
            })
            .collect();
        for (object, remaining) in suspended {
            let entry = self.shared.arm(&mut state, &handle, object, remaining);
            let _ = state.timers.insert(object, entry);
        }
        trace!(timers = state.timers.len(), "timers resumed");
    }

    /// Cancel every timer and leave the suspended mode.
    pub(crate) fn clear(&self) {
        let cleared = {
            let mut state = self.shared.state.lock();
            state.suspended = false;
            let cleared = state.timers.len();
            for (_, entry) in state.timers.drain() {
                entry.timer.abort();
            }
            cleared
        };
        if cleared > 0 {
            debug!(cleared, "timers cleared");
        }
    }

    /// Number of running timers, armed or suspended.
    pub(crate) fn len(&self) -> usize {
        self.shared.state.lock().timers.len()
    }

    /// Time left on the timer of `object`.
    pub(crate) fn remaining(&self, object: ObjectRef) -> Option<Duration> {
        let state = self.shared.state.lock();
        state
            .timers
            .get(&object)
            .map(|entry| entry.timer.remaining(Instant::now()))
    }

    /// Drop all timers and stop the runtime. Idempotent.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            for (_, entry) in state.timers.drain() {
                entry.timer.abort();
            }
        }
        // May run on the timer thread itself when the last session handle is
        // released by a firing timer.
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    fn service() -> (TimerService, mpsc::Receiver<ObjectRef>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let service = TimerService::new(
            "wayfarer-timers-test",
            Arc::new(move |object: ObjectRef| {
                let _ = tx.lock().send(object);
            }),
        );
        (service, rx)
    }

    #[test]
    fn fires_once_after_duration() {
        let (timers, rx) = service();
        let started = std::time::Instant::now();
        timers.start(ObjectRef::Registry(3), Duration::from_millis(20)).unwrap();

        let object = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(object, ObjectRef::Registry(3));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(timers.len(), 0);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn restart_replaces_the_deadline() {
        let (timers, rx) = service();
        timers.start(ObjectRef::Registry(4), Duration::from_millis(20)).unwrap();
        timers.start(ObjectRef::Registry(4), Duration::from_secs(60)).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(timers.remaining(ObjectRef::Registry(4)).unwrap() > Duration::from_secs(50));
    }

    #[test]
    fn stopped_timer_never_fires() {
        let (timers, rx) = service();
        timers.start(ObjectRef::Registry(1), Duration::from_millis(30)).unwrap();
        assert!(timers.stop(ObjectRef::Registry(1)));
        assert!(!timers.stop(ObjectRef::Registry(1)));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn suspend_keeps_remaining_time() {
        let (timers, rx) = service();
        timers.start(ObjectRef::Registry(2), Duration::from_millis(40)).unwrap();
        timers.suspend_all();
        let remaining = timers.remaining(ObjectRef::Registry(2)).unwrap();
        assert!(remaining <= Duration::from_millis(40));

        assert!(rx.recv_timeout(Duration::from_millis(120)).is_err());
        assert_eq!(timers.remaining(ObjectRef::Registry(2)), Some(remaining));

        timers.resume_all();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            ObjectRef::Registry(2)
        );
    }

    #[test]
    fn timers_started_while_suspended_wait_for_resume() {
        let (timers, rx) = service();
        timers.suspend_all();
        timers.start(ObjectRef::Player, Duration::ZERO).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        timers.resume_all();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), ObjectRef::Player);
    }

    #[test]
    fn unbounded_duration_is_held_without_firing() {
        let (timers, rx) = service();
        timers.start(ObjectRef::Registry(5), Duration::MAX).unwrap();
        assert_eq!(timers.remaining(ObjectRef::Registry(5)), Some(Duration::MAX));

        timers.suspend_all();
        timers.resume_all();
        timers.suspend_all();
        timers.start(ObjectRef::Registry(6), Duration::MAX).unwrap();
        timers.resume_all();

        assert_eq!(timers.len(), 2);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(timers.stop(ObjectRef::Registry(6)));
    }

    #[test]
    fn clear_and_shutdown() {
        let (timers, rx) = service();
        timers.start(ObjectRef::Registry(0), Duration::from_millis(30)).unwrap();
        timers.start(ObjectRef::Registry(1), Duration::from_millis(30)).unwrap();
        timers.clear();
        assert_eq!(timers.len(), 0);
        timers.shutdown();
        timers.shutdown();
        timers.start(ObjectRef::Registry(0), Duration::ZERO).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(80)).is_err());
    }
}

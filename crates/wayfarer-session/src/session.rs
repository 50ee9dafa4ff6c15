//! Session orchestration.
//!
//! Every lifecycle operation follows the same shape: check guards and enter
//! a transitional state under the state mutex, then (with the mutex released)
//! enqueue the cartridge hook, block until the executor is idle, do the
//! non-script work and enter the final state. A failure after the guards
//! restores the state the operation started from.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use wayfarer_core::{CartridgeInfo, ObjectFactory, ObjectRef, Position, ScriptHost, ScriptValue};
use wayfarer_savegame::{SaveError, SaveFile, SaveHeader};
use wayfarer_scheduler::{JobFault, SchedulerConfig, SchedulerError, ScriptExecutor};
use wayfarer_settings::PlayerSettings;

use crate::errors::{Result, SessionError};
use crate::events::{EventEmitter, SessionEvent};
use crate::pump::DispatchPump;
use crate::state::{Operation, SessionState};
use crate::timers::TimerService;

/// Lifecycle hook called on the cartridge object by `start`.
pub const ON_START: &str = "OnStart";
/// Lifecycle hook called on the cartridge object by `stop`.
pub const ON_END: &str = "OnEnd";
/// Lifecycle hook called on the cartridge object before a save is captured.
pub const ON_SYNC: &str = "OnSync";
/// Lifecycle hook called on the cartridge object after a restore.
pub const ON_RESTORE: &str = "OnRestore";
/// Function called on a timer object when its timer elapses.
pub const TICK: &str = "Tick";
/// Function called on the player for every position update while playing.
pub const PROCESS_LOCATION: &str = "ProcessLocation";

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Configures and creates a [`Session`].
pub struct SessionBuilder {
    host: Arc<dyn ScriptHost>,
    factory: Arc<dyn ObjectFactory>,
    settings: PlayerSettings,
    pump: Option<Arc<dyn DispatchPump>>,
}

impl SessionBuilder {
    /// Use `settings` instead of the defaults.
    #[must_use]
    pub fn settings(mut self, settings: PlayerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Include the embedder's UI dispatch queue in the busy flag.
    #[must_use]
    pub fn dispatch_pump(mut self, pump: Arc<dyn DispatchPump>) -> Self {
        self.pump = Some(pump);
        self
    }

    /// Create the session in [`SessionState::Uninitialized`].
    pub fn build(self) -> Session {
        let config = SchedulerConfig::from(&self.settings.scheduler);
        let timer_thread = format!("{}-timers", self.settings.scheduler.worker_thread_name);

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let on_timer = weak.clone();
            Inner {
                executor: ScriptExecutor::new(self.host, config),
                factory: self.factory,
                pump: self.pump,
                timers: TimerService::new(
                    timer_thread,
                    Arc::new(move |object: ObjectRef| {
                        if let Some(inner) = on_timer.upgrade() {
                            inner.on_timer(object);
                        }
                    }),
                ),
                core: Mutex::new(Core::default()),
                events: EventEmitter::new(),
                last_busy: AtomicBool::new(false),
                settings: self.settings,
            }
        });

        let on_fault = Arc::downgrade(&inner);
        inner
            .executor
            .scheduler()
            .set_fault_handler(Arc::new(move |fault: &JobFault| {
                if let Some(inner) = on_fault.upgrade() {
                    inner.on_fault(fault);
                }
            }));
        let on_busy = Arc::downgrade(&inner);
        inner
            .executor
            .scheduler()
            .set_busy_listener(Arc::new(move |_: bool| {
                if let Some(inner) = on_busy.upgrade() {
                    inner.refresh_busy();
                }
            }));

        Session { inner }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Core {
    state: SessionState,
    cartridge: Option<CartridgeInfo>,
    position: Position,
    failures: u32,
    crashed: bool,
}

impl Default for Core {
    fn default() -> Self {
        Self {
            state: SessionState::Uninitialized,
            cartridge: None,
            position: Position::default(),
            failures: 0,
            crashed: false,
        }
    }
}

impl Core {
    fn clear_faults(&mut self) {
        self.failures = 0;
        self.crashed = false;
    }
}

struct Inner {
    settings: PlayerSettings,
    executor: ScriptExecutor,
    factory: Arc<dyn ObjectFactory>,
    pump: Option<Arc<dyn DispatchPump>>,
    timers: TimerService,
    core: Mutex<Core>,
    events: EventEmitter,
    last_busy: AtomicBool,
}

/// One play session of one cartridge.
///
/// All methods are callable from any thread except the script worker;
/// blocking operations called from a script callback fail with
/// [`SchedulerError::CalledFromWorker`].
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Start configuring a session over `host`. `factory` builds objects a
    /// restore has to create.
    pub fn builder(host: Arc<dyn ScriptHost>, factory: Arc<dyn ObjectFactory>) -> SessionBuilder {
        SessionBuilder {
            host,
            factory,
            settings: PlayerSettings::default(),
            pump: None,
        }
    }

    /// Session with default settings and no dispatch pump.
    pub fn new(host: Arc<dyn ScriptHost>, factory: Arc<dyn ObjectFactory>) -> Self {
        Self::builder(host, factory).build()
    }

    /// Load `cartridge`. Uninitialized → Initialized.
    pub fn init(&self, cartridge: CartridgeInfo) -> Result<()> {
        let inner = &self.inner;
        inner.operate(Operation::Init, |_| {
            info!(cartridge = %cartridge.name, created = %cartridge.created, "cartridge loaded");
            {
                let mut core = inner.core.lock();
                core.cartridge = Some(cartridge);
                core.position = Position::default();
                core.clear_faults();
            }
            inner.executor.set_active(true);
            Ok(((), SessionState::Initialized))
        })
    }

    /// Run the cartridge's `OnStart` hook. Initialized → Playing.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        inner.operate(Operation::Start, |_| {
            inner.run_hook(ON_START)?;
            Ok(((), SessionState::Playing))
        })
    }

    /// Run the cartridge's `OnEnd` hook and drop all timers.
    /// Playing or Paused → Initialized. Clears a crash.
    pub fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        inner.operate(Operation::Stop, |previous| {
            inner.timers.clear();
            let _ = inner.executor.cancel_tag(&inner.settings.session.location_tag);
            if previous == SessionState::Paused {
                inner.executor.set_active(true);
            }
            if let Err(e) = inner.run_hook(ON_END) {
                if previous == SessionState::Paused {
                    inner.executor.set_active(false);
                }
                return Err(e);
            }
            inner.core.lock().clear_faults();
            Ok(((), SessionState::Initialized))
        })
    }

    /// Let queued script work finish, then suspend the executor and timers.
    /// Playing → Paused.
    pub fn pause(&self) -> Result<()> {
        let inner = &self.inner;
        inner.operate(Operation::Pause, |_| {
            inner.executor.wait_until_idle()?;
            inner.timers.suspend_all();
            inner.executor.set_active(false);
            Ok(((), SessionState::Paused))
        })
    }

    /// Reactivate the executor and re-arm timers. Paused → Playing.
    pub fn resume(&self) -> Result<()> {
        let inner = &self.inner;
        inner.operate(Operation::Resume, |_| {
            inner.executor.set_active(true);
            inner.timers.resume_all();
            Ok(((), SessionState::Playing))
        })
    }

    /// Save into a new buffer. See [`Session::save_to`].
    pub fn save(&self, save_name: &str) -> Result<Vec<u8>> {
        self.save_to(save_name, Vec::new())
    }

    /// Run `OnSync`, capture the object graph while the executor is idle and
    /// write it to `writer`. Playing → Playing.
    pub fn save_to<W: Write>(&self, save_name: &str, mut writer: W) -> Result<W> {
        let inner = &self.inner;
        inner.operate(Operation::Save, |_| {
            inner.run_hook(ON_SYNC)?;
            let file = inner.quiesced(true, || {
                let header = inner.save_header(save_name)?;
                Ok(SaveFile::capture(inner.host(), header)?)
            })?;
            let bytes = file.to_bytes()?;
            writer.write_all(&bytes).map_err(SaveError::from)?;

            info!(save_name, bytes = bytes.len(), objects = file.object_count(), "session saved");
            let _ = inner.events.emit(SessionEvent::Saved {
                save_name: save_name.to_owned(),
                bytes: bytes.len(),
            });
            Ok((writer, SessionState::Playing))
        })
    }

    /// Restore from a byte slice. See [`Session::restore_from`].
    pub fn restore(&self, bytes: &[u8]) -> Result<()> {
        self.restore_from(bytes)
    }

    /// Decode a save, verify it belongs to the loaded cartridge, load it into
    /// the host and run `OnRestore`. Initialized or Paused → Playing.
    ///
    /// The whole stream is decoded and checked before the object graph is
    /// touched; on any failure the session returns to its previous state.
    pub fn restore_from<R: Read>(&self, reader: R) -> Result<()> {
        let inner = &self.inner;
        inner.operate(Operation::Restore, |previous| {
            let file = SaveFile::read_from(reader)?;
            let cartridge = inner.core.lock().cartridge.clone();
            if let Some(cartridge) = &cartridge {
                file.verify_cartridge(cartridge)?;
            }

            let was_active = previous != SessionState::Paused;
            let created = inner.quiesced(was_active, || {
                Ok(file.apply(inner.host(), inner.factory.as_ref())?)
            })?;

            inner.timers.clear();
            let _ = inner.executor.cancel_tag(&inner.settings.session.location_tag);
            inner.executor.set_active(true);
            {
                let mut core = inner.core.lock();
                let header = &file.header;
                core.position = Position {
                    latitude: header.latitude,
                    longitude: header.longitude,
                    altitude: header.altitude,
                    ..core.position
                };
                core.clear_faults();
            }
            info!(
                save_name = %file.header.save_name,
                objects = file.object_count(),
                created,
                "session restored"
            );
            let _ = inner.events.emit(SessionEvent::Restored {
                objects: file.object_count(),
                created,
            });

            inner.run_hook(ON_RESTORE)?;
            Ok(((), SessionState::Playing))
        })
    }

    /// Unload the cartridge. Initialized → Uninitialized.
    pub fn reset(&self) -> Result<()> {
        let inner = &self.inner;
        inner.operate(Operation::Reset, |_| {
            inner.timers.clear();
            let _ = inner.executor.cancel_tag(&inner.settings.session.location_tag);
            {
                let mut core = inner.core.lock();
                core.cartridge = None;
                core.position = Position::default();
                core.clear_faults();
            }
            Ok(((), SessionState::Uninitialized))
        })
    }

    /// Stop timers and the executor. Idempotent; any state → Disposed.
    pub fn dispose(&self) {
        let inner = &self.inner;
        {
            let mut core = inner.core.lock();
            if matches!(core.state, SessionState::Disposing | SessionState::Disposed) {
                return;
            }
            let from = core.state;
            core.state = SessionState::Disposing;
            inner.announce(from, SessionState::Disposing);
        }
        inner.timers.shutdown();
        inner.executor.dispose();
        let mut core = inner.core.lock();
        core.state = SessionState::Disposed;
        inner.announce(SessionState::Disposing, SessionState::Disposed);
    }

    /// Record the latest position fix. While playing, also queue
    /// `player:ProcessLocation(lat, lon, alt, accuracy)`, replacing any
    /// update still waiting to run.
    pub fn update_position(&self, position: Position) -> Result<()> {
        let inner = &self.inner;
        let playing = {
            let mut core = inner.core.lock();
            if matches!(core.state, SessionState::Disposing | SessionState::Disposed) {
                return Err(SessionError::Disposed);
            }
            core.position = position;
            core.state == SessionState::Playing
        };
        if playing {
            let args = vec![
                ScriptValue::Number(position.latitude),
                ScriptValue::Number(position.longitude),
                ScriptValue::Number(position.altitude),
                ScriptValue::Number(position.accuracy),
            ];
            let _ = inner.executor.call_self_unique(
                &inner.settings.session.location_tag,
                ObjectRef::Player,
                PROCESS_LOCATION,
                args,
            )?;
        }
        Ok(())
    }

    /// Start or restart the timer of `object`; on elapse `object:Tick()` is
    /// queued. Timers started while paused begin counting on resume. A
    /// duration too large to schedule keeps the timer running without ever
    /// firing.
    pub fn start_timer(&self, object: ObjectRef, duration: Duration) -> Result<()> {
        self.inner.require_access("start timer")?;
        self.inner
            .timers
            .start(object, duration)
            .map_err(SessionError::TimerRuntime)
    }

    /// Cancel the timer of `object`. Returns whether it was running.
    pub fn stop_timer(&self, object: ObjectRef) -> Result<bool> {
        self.inner.require_access("stop timer")?;
        Ok(self.inner.timers.stop(object))
    }

    /// Time left on the timer of `object`, if it is running.
    pub fn timer_remaining(&self, object: ObjectRef) -> Option<Duration> {
        self.inner.timers.remaining(object)
    }

    /// Number of running timers.
    pub fn active_timers(&self) -> usize {
        self.inner.timers.len()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    /// See [`SessionState::is_ready`].
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Script work queued or running, or UI dispatch pending.
    pub fn is_busy(&self) -> bool {
        self.inner.is_busy()
    }

    /// Re-evaluate the busy flag after the dispatch pump changed.
    pub fn dispatch_changed(&self) {
        self.inner.refresh_busy();
    }

    /// Whether script faults reached the configured limit.
    pub fn is_crashed(&self) -> bool {
        self.inner.core.lock().crashed
    }

    /// Script faults counted since the last init, stop, restore or reset.
    pub fn script_failures(&self) -> u32 {
        self.inner.core.lock().failures
    }

    /// The loaded cartridge.
    pub fn cartridge(&self) -> Option<CartridgeInfo> {
        self.inner.core.lock().cartridge.clone()
    }

    /// Last recorded position.
    pub fn position(&self) -> Position {
        self.inner.core.lock().position
    }

    /// Receive [`SessionEvent`]s emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Executor for script calls issued by the embedder.
    pub fn executor(&self) -> &ScriptExecutor {
        &self.inner.executor
    }

    /// Settings the session was built with.
    pub fn settings(&self) -> &PlayerSettings {
        &self.inner.settings
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("core", &*self.inner.core.lock())
            .field("executor", &self.inner.executor)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internals
// ─────────────────────────────────────────────────────────────────────────────

impl Inner {
    fn host(&self) -> &dyn ScriptHost {
        self.executor.host().as_ref()
    }

    fn cartridge_object(&self) -> ObjectRef {
        ObjectRef::Registry(self.settings.session.cartridge_object_index)
    }

    /// Run `body` between guard checks and the final transition, rolling the
    /// state back if it fails. `body` gets the state the operation started
    /// from and returns its result plus the final state.
    fn operate<T>(
        &self,
        op: Operation,
        body: impl FnOnce(SessionState) -> Result<(T, SessionState)>,
    ) -> Result<T> {
        let previous = self.begin(op)?;
        let transitional = op.transitional();
        match body(previous) {
            Ok((value, to)) => {
                self.finish(transitional, to)?;
                Ok(value)
            }
            Err(error) => {
                warn!(
                    operation = op.name(),
                    category = error.category(),
                    error = %error,
                    state = %previous,
                    "operation failed, rolling back"
                );
                let _ = self.finish(transitional, previous);
                Err(error)
            }
        }
    }

    fn begin(&self, op: Operation) -> Result<SessionState> {
        if self.executor.is_worker_thread() {
            return Err(SchedulerError::CalledFromWorker.into());
        }
        let mut core = self.core.lock();
        let state = core.state;
        if matches!(state, SessionState::Disposing | SessionState::Disposed) {
            return Err(SessionError::Disposed);
        }
        let legal = (!op.requires_access() || state.is_ready())
            && !state.is_operation_in_progress()
            && state.can_transition_to(op.transitional());
        if !legal {
            debug!(operation = op.name(), %state, "operation rejected");
            return Err(SessionError::InvalidState {
                operation: op.name(),
                state,
            });
        }
        if op.rejected_when_crashed() && core.crashed {
            return Err(SessionError::Crashed);
        }
        core.state = op.transitional();
        self.announce(state, core.state);
        Ok(state)
    }

    /// Leave `transitional` for `to`. Fails if the session was disposed
    /// while the operation ran.
    fn finish(&self, transitional: SessionState, to: SessionState) -> Result<()> {
        let mut core = self.core.lock();
        if core.state != transitional {
            return Err(SessionError::Disposed);
        }
        core.state = to;
        self.announce(transitional, to);
        Ok(())
    }

    /// Log and publish a transition. Called with the state mutex held so
    /// subscribers see transitions in order.
    fn announce(&self, from: SessionState, to: SessionState) {
        info!(%from, %to, "session state changed");
        let _ = self.events.emit(SessionEvent::StateChanged { from, to });
        if from.is_ready() != to.is_ready() {
            let _ = self.events.emit(SessionEvent::ReadyChanged(to.is_ready()));
        }
    }

    fn require_access(&self, operation: &'static str) -> Result<()> {
        let state = self.core.lock().state;
        match state {
            SessionState::Disposing | SessionState::Disposed => Err(SessionError::Disposed),
            s if !s.is_ready() => Err(SessionError::InvalidState { operation, state }),
            _ => Ok(()),
        }
    }

    /// Queue `hook` on the cartridge object and wait for it and everything it
    /// triggers to finish.
    fn run_hook(&self, hook: &'static str) -> Result<()> {
        let target = self.cartridge_object();
        let job = self.executor.call_self(target, hook, Vec::new())?;
        debug!(hook, %target, %job, "lifecycle hook queued");
        self.wait_idle()
    }

    fn wait_idle(&self) -> Result<()> {
        self.executor.wait_until_idle()?;
        if self.executor.scheduler().is_disposed() {
            return Err(SessionError::Disposed);
        }
        Ok(())
    }

    /// Run `f` with the executor stopped and idle, then set its activity to
    /// `reactivate`.
    fn quiesced<T>(&self, reactivate: bool, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.executor.set_active(false);
        let result = self.wait_idle().and_then(|()| f());
        self.executor.set_active(reactivate);
        result
    }

    fn save_header(&self, save_name: &str) -> Result<SaveHeader> {
        let (cartridge, position) = {
            let core = self.core.lock();
            (core.cartridge.clone(), core.position)
        };
        let cartridge = cartridge.ok_or(SessionError::InvalidState {
            operation: "save",
            state: SessionState::Saving,
        })?;
        let player_name = self
            .host()
            .get_field(ObjectRef::Player, "Name")
            .and_then(|name| name.as_str().map(str::to_owned))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.settings.session.player_name.clone());

        Ok(SaveHeader {
            player_name,
            device_name: self.settings.device.name.clone(),
            device_id: self.settings.device.id.clone(),
            save_name: save_name.to_owned(),
            saved_at: Utc::now(),
            latitude: position.latitude,
            longitude: position.longitude,
            altitude: position.altitude,
            ..SaveHeader::for_cartridge(&cartridge)
        })
    }

    fn is_busy(&self) -> bool {
        self.executor.is_busy() || self.pump.as_ref().is_some_and(|pump| pump.is_busy())
    }

    fn refresh_busy(&self) {
        let busy = self.is_busy();
        if self.last_busy.swap(busy, Ordering::SeqCst) != busy {
            let _ = self.events.emit(SessionEvent::BusyChanged(busy));
        }
    }

    fn on_timer(&self, object: ObjectRef) {
        if let Err(error) = self.executor.call_self(object, TICK, Vec::new()) {
            debug!(%object, %error, "timer tick dropped");
        }
    }

    fn on_fault(&self, fault: &JobFault) {
        let crashed = {
            let mut core = self.core.lock();
            core.failures = core.failures.saturating_add(1);
            let limit = self.settings.session.max_script_failures;
            if core.crashed || core.failures < limit {
                None
            } else {
                core.crashed = true;
                Some(core.failures)
            }
        };
        let Some(failures) = crashed else { return };

        error!(failures, job = %fault.job, error = %fault.error, "session crashed");
        self.timers.clear();
        let _ = self.events.emit(SessionEvent::Crashed {
            failures,
            error: fault.error.to_string(),
        });
    }
}

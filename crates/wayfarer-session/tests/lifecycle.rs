//! End-to-end session lifecycle against the in-memory host.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use wayfarer_core::{
    CartridgeInfo, ClassCatalog, FunctionTable, MemoryHost, ObjectRef, Position, ScriptError,
    ScriptHost, ScriptValue, Table,
};
use wayfarer_savegame::{SaveError, SaveFile};
use wayfarer_scheduler::SchedulerError;
use wayfarer_session::{Session, SessionError, SessionEvent, SessionState};
use wayfarer_settings::PlayerSettings;

const CARTRIDGE: ObjectRef = ObjectRef::Registry(0);
const TIMER: ObjectRef = ObjectRef::Registry(1);

fn bump(
    host: &MemoryHost,
    this: Option<ObjectRef>,
    field: &str,
) -> Result<ScriptValue, ScriptError> {
    let Some(this) = this else {
        return Ok(ScriptValue::Nil);
    };
    let current = count(host, this, field);
    host.set_field(this, ScriptValue::from(field), ScriptValue::Number(current + 1.0))?;
    Ok(ScriptValue::Nil)
}

fn count(host: &MemoryHost, object: ObjectRef, field: &str) -> f64 {
    host.get_field(object, field)
        .and_then(|v| v.as_number())
        .unwrap_or(0.0)
}

fn functions() -> FunctionTable {
    FunctionTable::new()
        .with("on_start", |host, this, _| bump(host, this, "Started"))
        .with("on_end", |host, this, _| bump(host, this, "Ended"))
        .with("on_sync", |host, this, _| bump(host, this, "Synced"))
        .with("on_restore", |host, this, _| bump(host, this, "Restored"))
        .with("on_tick", |host, this, _| bump(host, this, "Ticks"))
        .with("process_location", |host, this, args| {
            if let (Some(this), Some(latitude)) = (this, args.first()) {
                host.set_field(this, ScriptValue::from("Latitude"), latitude.clone())?;
            }
            bump(host, this, "Fixes")
        })
        .with("slow_start", |host, this, _| {
            let _ = bump(host, this, "Entered")?;
            thread::sleep(Duration::from_millis(250));
            bump(host, this, "Started")
        })
        .with("fail", |_, _, _| {
            Err(ScriptError::runtime("fail", "lantern ran out of oil"))
        })
}

fn game() -> Arc<MemoryHost> {
    let host = MemoryHost::new(functions());
    let _ = host.insert_object(
        "ZCartridge",
        Table::new()
            .with("Name", "Lighthouse Trail")
            .with("OnStart", MemoryHost::function("on_start"))
            .with("OnEnd", MemoryHost::function("on_end"))
            .with("OnSync", MemoryHost::function("on_sync"))
            .with("OnRestore", MemoryHost::function("on_restore"))
            .with("Boom", MemoryHost::function("fail")),
    );
    let _ = host.insert_object(
        "ZTimer",
        Table::new()
            .with("Name", "Tide")
            .with("Tick", MemoryHost::function("on_tick")),
    );
    host.set_player_fields(
        Table::new()
            .with("Name", "Ann")
            .with("ProcessLocation", MemoryHost::function("process_location")),
    );
    Arc::new(host)
}

fn catalog() -> Arc<ClassCatalog> {
    Arc::new(
        ClassCatalog::new()
            .with_class("ZCartridge", Table::new())
            .with_class("ZTimer", Table::new()),
    )
}

fn cartridge() -> CartridgeInfo {
    let created = Utc.with_ymd_and_hms(2010, 6, 1, 12, 0, 0).unwrap();
    CartridgeInfo::new("Lighthouse Trail", created)
}

fn session(host: &Arc<MemoryHost>) -> Session {
    Session::new(host.clone(), catalog())
}

fn playing(host: &Arc<MemoryHost>) -> Session {
    let session = session(host);
    session.init(cartridge()).unwrap();
    session.start().unwrap();
    session
}

fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if !matches!(event, SessionEvent::BusyChanged(_)) {
            events.push(event);
        }
    }
    events
}

// ─────────────────────────────────────────────────────────────────────────────
// Transitions
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn init_and_start_run_on_start() {
    let host = game();
    let session = session(&host);
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(!session.is_ready());

    session.init(cartridge()).unwrap();
    assert_eq!(session.state(), SessionState::Initialized);
    assert!(session.is_ready());
    assert_eq!(session.cartridge(), Some(cartridge()));

    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Playing);
    assert_eq!(count(&host, CARTRIDGE, "Started"), 1.0);
    assert!(!session.is_busy());
}

#[test]
fn illegal_operations_change_nothing() {
    let host = game();
    let session = session(&host);

    assert_matches!(
        session.pause(),
        Err(SessionError::InvalidState { operation: "pause", state: SessionState::Uninitialized })
    );
    assert_matches!(session.save("early"), Err(SessionError::InvalidState { .. }));

    session.init(cartridge()).unwrap();
    assert_matches!(session.init(cartridge()), Err(SessionError::InvalidState { .. }));
    assert_matches!(session.stop(), Err(SessionError::InvalidState { .. }));

    session.start().unwrap();
    assert_matches!(
        session.start(),
        Err(SessionError::InvalidState { operation: "start", state: SessionState::Playing })
    );
    assert_matches!(session.reset(), Err(SessionError::InvalidState { .. }));
    assert_eq!(session.state(), SessionState::Playing);
    assert_eq!(count(&host, CARTRIDGE, "Started"), 1.0);
}

#[test]
fn stop_runs_on_end_and_allows_restart() {
    let host = game();
    let session = playing(&host);
    session.pause().unwrap();
    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Initialized);
    assert_eq!(count(&host, CARTRIDGE, "Ended"), 1.0);

    session.start().unwrap();
    assert_eq!(count(&host, CARTRIDGE, "Started"), 2.0);
}

#[test]
fn reset_unloads_the_cartridge() {
    let host = game();
    let session = session(&host);
    session.init(cartridge()).unwrap();
    session.reset().unwrap();
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert_eq!(session.cartridge(), None);
    session.init(cartridge()).unwrap();
}

#[test]
fn events_follow_transitions() {
    let host = game();
    let session = session(&host);
    let mut rx = session.subscribe();

    session.init(cartridge()).unwrap();
    session.start().unwrap();

    assert_eq!(
        drain(&mut rx),
        vec![
            SessionEvent::StateChanged {
                from: SessionState::Uninitialized,
                to: SessionState::Initializing,
            },
            SessionEvent::StateChanged {
                from: SessionState::Initializing,
                to: SessionState::Initialized,
            },
            SessionEvent::ReadyChanged(true),
            SessionEvent::StateChanged {
                from: SessionState::Initialized,
                to: SessionState::Starting,
            },
            SessionEvent::StateChanged {
                from: SessionState::Starting,
                to: SessionState::Playing,
            },
        ]
    );
}

#[test]
fn dispose_is_idempotent_and_final() {
    let host = game();
    let session = playing(&host);
    let mut rx = session.subscribe();

    session.dispose();
    session.dispose();
    assert_eq!(session.state(), SessionState::Disposed);
    assert!(!session.is_ready());
    assert_matches!(session.start(), Err(SessionError::Disposed));
    assert_matches!(session.update_position(Position::default()), Err(SessionError::Disposed));
    assert_matches!(
        session.start_timer(TIMER, Duration::from_secs(1)),
        Err(SessionError::Disposed)
    );

    let events = drain(&mut rx);
    assert_eq!(
        events.iter().filter(|e| matches!(e, SessionEvent::StateChanged { .. })).count(),
        2
    );
    assert!(events.contains(&SessionEvent::ReadyChanged(false)));
}

#[test]
fn dispose_during_a_running_hook() {
    let host = game();
    host.set_field(CARTRIDGE, ScriptValue::from("OnStart"), MemoryHost::function("slow_start"))
        .unwrap();
    let session = Arc::new(session(&host));
    session.init(cartridge()).unwrap();

    let starter = Arc::clone(&session);
    let start = thread::spawn(move || starter.start());
    assert!(eventually(|| count(&host, CARTRIDGE, "Entered") == 1.0));

    let disposing = Instant::now();
    session.dispose();
    assert!(disposing.elapsed() < Duration::from_secs(5));

    assert_matches!(start.join().unwrap(), Err(SessionError::Disposed));
    assert_eq!(session.state(), SessionState::Disposed);
    assert_eq!(count(&host, CARTRIDGE, "Started"), 1.0);
    session.dispose();
}

#[test]
fn lifecycle_from_a_script_callback_fails_fast() {
    let host = game();
    let session = Arc::new(playing(&host));
    let (tx, rx) = mpsc::channel();

    let inner = Arc::clone(&session);
    let _ = session
        .executor()
        .submit(
            move || {
                let _ = tx.send(inner.pause());
                Ok(())
            },
            None,
            true,
        )
        .unwrap();

    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_matches!(
        result,
        Err(SessionError::Scheduler(SchedulerError::CalledFromWorker))
    );
    session.executor().wait_until_idle().unwrap();
    assert_eq!(session.state(), SessionState::Playing);
}

// ─────────────────────────────────────────────────────────────────────────────
// Position and timers
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn position_updates_collapse_to_the_latest() {
    let host = game();
    let session = playing(&host);

    session.executor().set_active(false);
    for latitude in [54.0, 54.1, 54.2] {
        session
            .update_position(Position::new(latitude, 12.3, 4.0, 5.0))
            .unwrap();
    }
    session.executor().set_active(true);
    session.executor().wait_until_idle().unwrap();

    assert_eq!(count(&host, ObjectRef::Player, "Fixes"), 1.0);
    assert_eq!(
        host.get_field(ObjectRef::Player, "Latitude"),
        Some(ScriptValue::Number(54.2))
    );
    assert_eq!(session.position().latitude, 54.2);
}

#[test]
fn position_is_recorded_before_playing() {
    let host = game();
    let session = session(&host);
    session.init(cartridge()).unwrap();
    session.update_position(Position::new(1.0, 2.0, 3.0, 4.0)).unwrap();
    assert_eq!(session.position(), Position::new(1.0, 2.0, 3.0, 4.0));
    session.executor().wait_until_idle().unwrap();
    assert_eq!(count(&host, ObjectRef::Player, "Fixes"), 0.0);
}

#[test]
fn timer_calls_tick() {
    let host = game();
    let session = playing(&host);
    session.start_timer(TIMER, Duration::from_millis(10)).unwrap();
    assert!(eventually(|| count(&host, TIMER, "Ticks") == 1.0));
    assert_eq!(session.active_timers(), 0);
}

#[test]
fn paused_timers_do_not_fire() {
    let host = game();
    let session = playing(&host);
    session.start_timer(TIMER, Duration::from_millis(200)).unwrap();
    session.pause().unwrap();

    thread::sleep(Duration::from_millis(300));
    assert_eq!(count(&host, TIMER, "Ticks"), 0.0);
    assert!(session.timer_remaining(TIMER).is_some());

    session.resume().unwrap();
    assert!(eventually(|| count(&host, TIMER, "Ticks") == 1.0));
}

#[test]
fn unbounded_timer_survives_pause_and_resume() {
    let host = game();
    let session = playing(&host);
    session.start_timer(TIMER, Duration::MAX).unwrap();
    assert_eq!(session.timer_remaining(TIMER), Some(Duration::MAX));

    session.pause().unwrap();
    session.start_timer(ObjectRef::Player, Duration::MAX).unwrap();
    session.resume().unwrap();

    assert_eq!(session.active_timers(), 2);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(count(&host, TIMER, "Ticks"), 0.0);
    assert!(session.stop_timer(TIMER).unwrap());
}

#[test]
fn timers_need_a_loaded_cartridge() {
    let host = game();
    let session = session(&host);
    assert_matches!(
        session.start_timer(TIMER, Duration::from_millis(10)),
        Err(SessionError::InvalidState { .. })
    );
    session.init(cartridge()).unwrap();
    session.start_timer(TIMER, Duration::from_secs(60)).unwrap();
    assert!(session.stop_timer(TIMER).unwrap());
    assert!(!session.stop_timer(TIMER).unwrap());
}

// ─────────────────────────────────────────────────────────────────────────────
// Save and restore
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn save_runs_on_sync_and_fills_the_header() {
    let host = game();
    let session = playing(&host);
    session.update_position(Position::new(54.1, 12.3, 4.0, 5.0)).unwrap();
    let mut rx = session.subscribe();

    let bytes = session.save("autosave").unwrap();
    assert_eq!(session.state(), SessionState::Playing);
    assert_eq!(count(&host, CARTRIDGE, "Synced"), 1.0);

    let file = SaveFile::from_bytes(&bytes).unwrap();
    let settings = PlayerSettings::default();
    assert_eq!(file.header.cartridge_name, "Lighthouse Trail");
    assert_eq!(file.header.player_name, "Ann");
    assert_eq!(file.header.device_name, settings.device.name);
    assert_eq!(file.header.save_name, "autosave");
    assert_eq!(file.header.latitude, 54.1);
    assert_eq!(file.object_count(), 2);

    assert!(drain(&mut rx).contains(&SessionEvent::Saved {
        save_name: "autosave".into(),
        bytes: bytes.len(),
    }));
}

#[test]
fn restore_into_a_fresh_session() {
    let host = game();
    let bytes = playing(&host).save("autosave").unwrap();

    let fresh = game();
    let session = session(&fresh);
    session.init(cartridge()).unwrap();
    let mut rx = session.subscribe();
    session.restore(&bytes).unwrap();

    assert_eq!(session.state(), SessionState::Playing);
    assert_eq!(count(&fresh, CARTRIDGE, "Started"), 1.0);
    assert_eq!(count(&fresh, CARTRIDGE, "Synced"), 1.0);
    assert_eq!(count(&fresh, CARTRIDGE, "Restored"), 1.0);
    assert!(drain(&mut rx).contains(&SessionEvent::Restored { objects: 2, created: 0 }));
}

#[test]
fn restore_from_paused_resumes_play() {
    let host = game();
    let session = playing(&host);
    let bytes = session.save("checkpoint").unwrap();
    session.pause().unwrap();

    session.restore(&bytes).unwrap();
    assert_eq!(session.state(), SessionState::Playing);
    session.update_position(Position::new(1.0, 1.0, 1.0, 1.0)).unwrap();
    session.executor().wait_until_idle().unwrap();
    assert_eq!(count(&host, ObjectRef::Player, "Fixes"), 1.0);
}

#[test]
fn restore_is_not_allowed_while_playing() {
    let host = game();
    let session = playing(&host);
    let bytes = session.save("autosave").unwrap();
    assert_matches!(
        session.restore(&bytes),
        Err(SessionError::InvalidState { operation: "restore", state: SessionState::Playing })
    );
}

#[test]
fn foreign_save_rolls_back() {
    let host = game();
    let bytes = playing(&host).save("autosave").unwrap();

    let other = CartridgeInfo::new(
        "Lighthouse Trail",
        Utc.with_ymd_and_hms(2011, 1, 1, 0, 0, 0).unwrap(),
    );
    let fresh = game();
    let session = session(&fresh);
    session.init(other).unwrap();

    assert_matches!(
        session.restore(&bytes),
        Err(SessionError::Save(SaveError::ForeignSaveFile { .. }))
    );
    assert_eq!(session.state(), SessionState::Initialized);
    assert_eq!(count(&fresh, CARTRIDGE, "Started"), 0.0);
    session.start().unwrap();
}

#[test]
fn garbage_restore_rolls_back_from_paused() {
    let host = game();
    let session = playing(&host);
    session.pause().unwrap();
    assert_matches!(session.restore(b"not a save"), Err(SessionError::Save(_)));
    assert_eq!(session.state(), SessionState::Paused);
    session.resume().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Crash handling
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn script_fault_crashes_until_stopped() {
    let host = game();
    let session = playing(&host);
    let mut rx = session.subscribe();

    let _ = session.executor().call_self(CARTRIDGE, "Boom", Vec::new()).unwrap();
    session.executor().wait_until_idle().unwrap();

    assert!(session.is_crashed());
    assert_eq!(session.script_failures(), 1);
    assert_matches!(session.save("after crash"), Err(SessionError::Crashed));
    assert_eq!(session.state(), SessionState::Playing);
    assert!(drain(&mut rx).iter().any(|e| matches!(e, SessionEvent::Crashed { failures: 1, .. })));

    session.stop().unwrap();
    assert!(!session.is_crashed());
    session.start().unwrap();
}

#[test]
fn crash_limit_is_configurable() {
    let host = game();
    let mut settings = PlayerSettings::default();
    settings.session.max_script_failures = 2;
    let session = Session::builder(host.clone(), catalog())
        .settings(settings)
        .build();
    session.init(cartridge()).unwrap();
    session.start().unwrap();

    let _ = session.executor().call_self(CARTRIDGE, "Boom", Vec::new()).unwrap();
    session.executor().wait_until_idle().unwrap();
    assert!(!session.is_crashed());

    let _ = session.executor().call_self(CARTRIDGE, "Boom", Vec::new()).unwrap();
    session.executor().wait_until_idle().unwrap();
    assert!(session.is_crashed());
    assert_eq!(session.script_failures(), 2);
}

#[test]
fn crash_during_start_blocks_resume() {
    let host = game();
    host.set_field(CARTRIDGE, ScriptValue::from("OnStart"), MemoryHost::function("fail"))
        .unwrap();
    let session = session(&host);
    session.init(cartridge()).unwrap();

    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Playing);
    assert!(session.is_crashed());

    session.pause().unwrap();
    assert_matches!(session.resume(), Err(SessionError::Crashed));
    assert_eq!(session.state(), SessionState::Paused);
}

// ─────────────────────────────────────────────────────────────────────────────
// Busy flag
// ─────────────────────────────────────────────────────────────────────────────

struct Pump(std::sync::atomic::AtomicBool);

impl wayfarer_session::DispatchPump for Pump {
    fn is_busy(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[test]
fn dispatch_pump_contributes_to_busy() {
    let host = game();
    let pump = Arc::new(Pump(std::sync::atomic::AtomicBool::new(false)));
    let session = Session::builder(host.clone(), catalog())
        .dispatch_pump(pump.clone())
        .build();
    let mut rx = session.subscribe();
    assert!(!session.is_busy());

    pump.0.store(true, std::sync::atomic::Ordering::SeqCst);
    assert!(session.is_busy());
    session.dispatch_changed();
    assert_eq!(rx.try_recv().unwrap(), SessionEvent::BusyChanged(true));

    pump.0.store(false, std::sync::atomic::Ordering::SeqCst);
    session.dispatch_changed();
    assert_eq!(rx.try_recv().unwrap(), SessionEvent::BusyChanged(false));
}

//! # wayfarer-session
//!
//! Lifecycle of one cartridge play session.
//!
//! - [`Session`]: init, start, pause, resume, save, restore, stop, reset and
//!   dispose, each guarded by the [`SessionState`] machine and serialized
//!   against script execution through the executor's idle wait
//! - Script timers that suspend with the session and call `Tick` on elapse
//! - Crash tracking: script faults are counted and past the configured limit
//!   the session refuses to start, resume or save until stopped
//! - [`SessionEvent`] broadcast for state, ready, busy, crash, save and
//!   restore notifications
//!
//! Operations block the caller and must not be called from a script callback.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod pump;
pub mod session;
pub mod state;
mod timers;

pub use errors::{Result, SessionError};
pub use events::SessionEvent;
pub use pump::DispatchPump;
pub use session::{Session, SessionBuilder};
pub use state::SessionState;

//! Session error types.

use wayfarer_core::ScriptError;
use wayfarer_savegame::SaveError;
use wayfarer_scheduler::SchedulerError;

use crate::state::SessionState;

/// Errors returned by [`crate::Session`] operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The operation is not legal in the current state. Nothing was changed.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: SessionState,
    },

    /// The session has been disposed.
    #[error("session disposed")]
    Disposed,

    /// Too many script faults; stop or reset the session first.
    #[error("session crashed after repeated script failures")]
    Crashed,

    /// The timer runtime could not be started.
    #[error("failed to start timer runtime: {0}")]
    TimerRuntime(#[source] std::io::Error),

    /// Executor failure.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Save or restore failure.
    #[error(transparent)]
    Save(#[from] SaveError),

    /// Script host failure outside a job.
    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl SessionError {
    /// Short classification string for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidState { .. } => "invalid_state",
            Self::Disposed => "disposed",
            Self::Crashed => "crashed",
            Self::TimerRuntime(_) => "timer_runtime",
            Self::Scheduler(e) => e.category(),
            Self::Save(e) => e.category(),
            Self::Script(e) => e.category(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SessionError>;

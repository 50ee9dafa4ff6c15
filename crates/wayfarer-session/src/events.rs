//! Broadcast of session notifications.

use tokio::sync::broadcast;

use crate::state::SessionState;

const DEFAULT_CAPACITY: usize = 256;

/// Notification published by a [`crate::Session`].
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The lifecycle state changed.
    StateChanged {
        /// Previous state.
        from: SessionState,
        /// New state.
        to: SessionState,
    },
    /// [`crate::Session::is_ready`] flipped.
    ReadyChanged(bool),
    /// [`crate::Session::is_busy`] flipped.
    BusyChanged(bool),
    /// Script faults reached the configured limit.
    Crashed {
        /// Faults counted so far.
        failures: u32,
        /// Message of the fault that crossed the limit.
        error: String,
    },
    /// A save completed.
    Saved {
        /// Name recorded in the header.
        save_name: String,
        /// Encoded size.
        bytes: usize,
    },
    /// A restore completed.
    Restored {
        /// Registry size after restore.
        objects: usize,
        /// Objects that had to be constructed.
        created: usize,
    },
}

/// Non-blocking fan-out of [`SessionEvent`]s. Lagging receivers lose events
/// instead of blocking the session.
pub(crate) struct EventEmitter {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventEmitter {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx }
    }

    /// Returns the number of receivers reached.
    pub(crate) fn emit(&self, event: SessionEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

//! Session lifecycle states and the operations that move between them.

use std::fmt;

/// Lifecycle state of a [`crate::Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No cartridge loaded.
    Uninitialized,
    /// `init` in progress.
    Initializing,
    /// Cartridge loaded, game not running.
    Initialized,
    /// `start` in progress.
    Starting,
    /// Game running.
    Playing,
    /// `pause` in progress.
    Pausing,
    /// Game suspended.
    Paused,
    /// `resume` in progress.
    Resuming,
    /// `save` in progress.
    Saving,
    /// `restore` in progress.
    Restoring,
    /// `stop` in progress.
    Stopping,
    /// `reset` in progress.
    Uninitializing,
    /// `dispose` in progress.
    Disposing,
    /// Terminal.
    Disposed,
}

impl SessionState {
    /// Whether the session holds a usable cartridge. False while loading,
    /// unloading and after disposal.
    pub fn is_ready(self) -> bool {
        !matches!(
            self,
            Self::Uninitialized
                | Self::Initializing
                | Self::Uninitializing
                | Self::Disposing
                | Self::Disposed
        )
    }

    /// Whether another lifecycle operation is running.
    pub fn is_operation_in_progress(self) -> bool {
        matches!(
            self,
            Self::Starting
                | Self::Saving
                | Self::Restoring
                | Self::Stopping
                | Self::Pausing
                | Self::Resuming
        )
    }

    /// Whether `self → to` is a legal edge, including the edges an operation
    /// takes when it rolls back.
    pub fn can_transition_to(self, to: Self) -> bool {
        use SessionState::{
            Disposed, Disposing, Initialized, Initializing, Paused, Pausing, Playing, Restoring,
            Resuming, Saving, Starting, Stopping, Uninitialized, Uninitializing,
        };
        match (self, to) {
            (Disposed, _) => false,
            (Disposing, to) => to == Disposed,
            (_, Disposing) => true,
            (Uninitialized, Initializing)
            | (Initializing, Initialized | Uninitialized)
            | (Initialized, Starting | Restoring | Uninitializing)
            | (Starting, Playing | Initialized)
            | (Playing, Pausing | Saving | Stopping)
            | (Pausing, Paused | Playing)
            | (Paused, Resuming | Restoring | Stopping)
            | (Resuming, Playing | Paused)
            | (Saving, Playing)
            | (Restoring, Playing | Initialized | Paused)
            | (Stopping, Initialized | Playing | Paused)
            | (Uninitializing, Uninitialized | Initialized) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Starting => "starting",
            Self::Playing => "playing",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Resuming => "resuming",
            Self::Saving => "saving",
            Self::Restoring => "restoring",
            Self::Stopping => "stopping",
            Self::Uninitializing => "uninitializing",
            Self::Disposing => "disposing",
            Self::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Public lifecycle operations other than dispose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Operation {
    Init,
    Start,
    Stop,
    Pause,
    Resume,
    Save,
    Restore,
    Reset,
}

impl Operation {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Save => "save",
            Self::Restore => "restore",
            Self::Reset => "reset",
        }
    }

    /// State held while the operation runs.
    pub(crate) fn transitional(self) -> SessionState {
        match self {
            Self::Init => SessionState::Initializing,
            Self::Start => SessionState::Starting,
            Self::Stop => SessionState::Stopping,
            Self::Pause => SessionState::Pausing,
            Self::Resume => SessionState::Resuming,
            Self::Save => SessionState::Saving,
            Self::Restore => SessionState::Restoring,
            Self::Reset => SessionState::Uninitializing,
        }
    }

    /// `init` is the only operation that runs without a loaded cartridge.
    pub(crate) fn requires_access(self) -> bool {
        self != Self::Init
    }

    pub(crate) fn rejected_when_crashed(self) -> bool {
        matches!(self, Self::Start | Self::Resume | Self::Save)
    }
}

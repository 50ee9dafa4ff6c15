//! Scheduler error types.

/// Usage errors raised by the scheduler and executor.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The scheduler has been disposed.
    #[error("scheduler disposed")]
    Disposed,

    /// A blocking wait was requested from the worker thread itself.
    #[error("cannot wait for idle from the script worker thread")]
    CalledFromWorker,

    /// The worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl SchedulerError {
    /// Short classification string for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Disposed => "disposed",
            Self::CalledFromWorker => "called_from_worker",
            Self::Spawn(_) => "spawn",
        }
    }
}

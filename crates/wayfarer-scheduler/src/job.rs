//! Job types.

use std::fmt;
use std::sync::Arc;

use wayfarer_core::ScriptError;

/// Work item executed on the worker thread.
pub type JobAction = Box<dyn FnOnce() -> Result<(), ScriptError> + Send + 'static>;

/// Receives failures of jobs. Runs on the worker thread.
pub type FaultHandler = Arc<dyn Fn(&JobFault) + Send + Sync>;

/// Receives busy/idle flips. Invoked outside the scheduler lock.
pub type BusyListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Submission sequence number of a job. Jobs run in ascending order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub(crate) u64);

impl JobId {
    /// Raw sequence number.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A job that failed while running.
#[derive(Clone, Debug)]
pub struct JobFault {
    /// The failed job.
    pub job: JobId,
    /// Tag the job was submitted under.
    pub tag: Option<String>,
    /// What went wrong. Panics arrive as [`ScriptError::Panic`].
    pub error: ScriptError,
}

/// Queued job. Owned by the scheduler until it runs or is skipped.
pub(crate) struct Job {
    pub(crate) id: JobId,
    pub(crate) tag: Option<String>,
    /// Generation of `tag` at submit time; stale once the tag is cancelled.
    pub(crate) generation: u64,
    pub(crate) action: JobAction,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

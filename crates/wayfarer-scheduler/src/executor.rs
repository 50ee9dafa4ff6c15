//! Script call semantics on top of [`JobScheduler`].

use std::sync::Arc;

use tracing::debug;
use wayfarer_core::{ObjectRef, ScriptError, ScriptHost, ScriptValue};

use crate::errors::SchedulerError;
use crate::job::JobId;
use crate::scheduler::{JobScheduler, SchedulerConfig};

/// Runs script functions against host objects on the scheduler's worker.
///
/// Every call is resolved when it runs, not when it is queued: a call whose
/// target object or function no longer resolves is skipped.
pub struct ScriptExecutor {
    scheduler: JobScheduler,
    host: Arc<dyn ScriptHost>,
}

impl ScriptExecutor {
    /// Create an executor over `host`.
    #[must_use]
    pub fn new(host: Arc<dyn ScriptHost>, config: SchedulerConfig) -> Self {
        Self {
            scheduler: JobScheduler::new(config),
            host,
        }
    }

    /// Enqueue `target.function(args)`.
    pub fn call(
        &self,
        target: ObjectRef,
        function: impl Into<String>,
        args: Vec<ScriptValue>,
    ) -> Result<JobId, SchedulerError> {
        let job = self.job(target, function.into(), false, args);
        self.scheduler.submit(job, None, true)
    }

    /// Enqueue `target:function(args)`, binding `target` as the first argument.
    pub fn call_self(
        &self,
        target: ObjectRef,
        function: impl Into<String>,
        args: Vec<ScriptValue>,
    ) -> Result<JobId, SchedulerError> {
        let job = self.job(target, function.into(), true, args);
        self.scheduler.submit(job, None, true)
    }

    /// Like [`ScriptExecutor::call_self`], but first cancels every call still
    /// queued under `tag`, so at most one instance is ever pending.
    pub fn call_self_unique(
        &self,
        tag: &str,
        target: ObjectRef,
        function: impl Into<String>,
        args: Vec<ScriptValue>,
    ) -> Result<JobId, SchedulerError> {
        let job = self.job(target, function.into(), true, args);
        self.scheduler.submit_unique(job, tag, true)
    }

    fn job(
        &self,
        target: ObjectRef,
        function: String,
        bind_self: bool,
        args: Vec<ScriptValue>,
    ) -> impl FnOnce() -> Result<(), ScriptError> + Send + 'static {
        let host = Arc::clone(&self.host);
        move || {
            if !host.has_function(target, &function) {
                debug!(%target, function = %function, "call target no longer resolves, skipping");
                return Ok(());
            }
            host.invoke(target, &function, bind_self, args).map(drop)
        }
    }

    /// Run `action` inline when already on the worker thread, otherwise
    /// enqueue it. Returns the job id when it was queued.
    pub fn run_or_enqueue<F>(&self, action: F) -> Result<Option<JobId>, SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.scheduler.is_worker_thread() {
            action();
            return Ok(None);
        }
        self.scheduler
            .submit(
                move || {
                    action();
                    Ok(())
                },
                None,
                true,
            )
            .map(Some)
    }

    /// Block until no call is queued or executing. Fails with
    /// [`SchedulerError::CalledFromWorker`] on the worker thread.
    pub fn wait_until_idle(&self) -> Result<(), SchedulerError> {
        self.scheduler.wait_until_idle()
    }

    /// Whether the calling thread is the script worker.
    pub fn is_worker_thread(&self) -> bool {
        self.scheduler.is_worker_thread()
    }

    /// Submit an arbitrary job. See [`JobScheduler::submit`].
    pub fn submit<F>(
        &self,
        action: F,
        tag: Option<&str>,
        wake: bool,
    ) -> Result<JobId, SchedulerError>
    where
        F: FnOnce() -> Result<(), ScriptError> + Send + 'static,
    {
        self.scheduler.submit(action, tag, wake)
    }

    /// See [`JobScheduler::cancel_tag`].
    pub fn cancel_tag(&self, tag: &str) -> usize {
        self.scheduler.cancel_tag(tag)
    }

    /// See [`JobScheduler::is_busy`].
    pub fn is_busy(&self) -> bool {
        self.scheduler.is_busy()
    }

    /// See [`JobScheduler::set_active`].
    pub fn set_active(&self, active: bool) {
        self.scheduler.set_active(active);
    }

    /// See [`JobScheduler::dispose`].
    pub fn dispose(&self) {
        self.scheduler.dispose();
    }

    /// The underlying scheduler.
    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// The script host calls are resolved against.
    pub fn host(&self) -> &Arc<dyn ScriptHost> {
        &self.host
    }
}

impl std::fmt::Debug for ScriptExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptExecutor")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

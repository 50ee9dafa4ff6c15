//! # wayfarer-scheduler
//!
//! Sequential execution of everything that touches script state.
//!
//! - [`JobScheduler`]: thread-safe FIFO queue drained by one lazily started
//!   worker thread, with pause/resume, an observable busy signal and tag-based
//!   cancellation of jobs that have not started yet
//! - [`ScriptExecutor`]: script call semantics on top of the scheduler plus
//!   [`ScriptExecutor::wait_until_idle`], the blocking quiescence primitive
//!   used by the session lifecycle
//!
//! Job failures (errors and panics) never take the worker down; they are
//! forwarded to the registered [`FaultHandler`].

#![deny(unsafe_code)]

pub mod errors;
pub mod executor;
pub mod job;
pub mod scheduler;

pub use errors::SchedulerError;
pub use executor::ScriptExecutor;
pub use job::{BusyListener, FaultHandler, JobAction, JobFault, JobId};
pub use scheduler::{JobScheduler, SchedulerConfig};

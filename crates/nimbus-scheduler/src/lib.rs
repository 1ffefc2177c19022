//! Persistent job scheduler for nimbus.
//!
//! The scheduler stores job descriptors in PostgreSQL (via `nimbus-store`),
//! fires them from a single event loop, captures their output through a
//! per-execution log sink, and appends every lifecycle transition to the
//! history table:
//!
//! - [`JobRegistry`] resolves `module:symbol` references to handlers
//!   registered at startup; unknown references fail at job creation.
//! - [`JobLogSink`] / [`JobLogStore`] capture and hand off execution output.
//! - The executor wraps one invocation: `running` history row, handler call
//!   (async awaited, blocking on a worker thread), log stashing.
//! - [`Scheduler`] owns the fire loop (ordering, misfire policy,
//!   `max_instances` accounting) and the listener that writes terminal
//!   history rows and removes finished one-time jobs.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod executor;
pub mod logs;
pub mod registry;
pub mod scheduler;

pub use error::{Result, SchedulerError};
pub use logs::{JobContext, JobLogSink, JobLogStore};
pub use registry::{JobArgs, JobError, JobHandler, JobKwargs, JobRegistry, JobResult};
pub use scheduler::{Scheduler, SchedulerConfig};

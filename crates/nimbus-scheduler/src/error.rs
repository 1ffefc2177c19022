//! Scheduler error types.

use nimbus_core::{CoreError, JobId};
use nimbus_store::StoreError;

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors surfaced by the scheduler's public API.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// No job with this id exists.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// A job with this id already exists and `replace` was not set.
    #[error("job already exists: {0}")]
    Conflict(JobId),

    /// The function reference is not registered.
    #[error("unknown job function: {0}")]
    UnknownFunction(String),

    /// A write could not be observed in the job store after retries.
    #[error("job {job_id} was added but not found in the job store after {attempts} attempts")]
    Persistence {
        /// The job whose write went missing.
        job_id: JobId,
        /// How many verification reads were attempted.
        attempts: u32,
    },

    /// The scheduler has not been started.
    #[error("scheduler is not running")]
    NotRunning,

    /// Domain validation failure (bad trigger, bad id).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

//! The persisted job descriptor.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::JobId;
use crate::trigger::Trigger;

// ============================================================================
// Defaults
// ============================================================================

/// Default misfire grace window in seconds (one hour).
pub const DEFAULT_MISFIRE_GRACE_SECONDS: i64 = 3600;

/// Default bound on concurrent executions per job id.
pub const DEFAULT_MAX_INSTANCES: u32 = 3;

fn default_misfire_grace_seconds() -> i64 {
    DEFAULT_MISFIRE_GRACE_SECONDS
}

fn default_max_instances() -> u32 {
    DEFAULT_MAX_INSTANCES
}

fn default_coalesce() -> bool {
    true
}

/// A job as persisted in the job store.
///
/// The whole descriptor is serialized into the store's opaque payload
/// column; `id`, `next_run_at`, and `paused` are additionally projected into
/// their own columns so the scheduler's due-scan never has to deserialize
/// payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Unique job identifier, chosen by the caller.
    pub id: JobId,

    /// Function reference in `module:symbol` form, resolved through the
    /// registry at creation and execution time.
    pub func_ref: String,

    /// When the job fires.
    pub trigger: Trigger,

    /// Positional arguments passed to the function.
    #[serde(default)]
    pub args: Vec<Value>,

    /// Keyword arguments passed to the function.
    #[serde(default)]
    pub kwargs: Map<String, Value>,

    /// The next fire time. `None` while paused, and for `once` jobs that
    /// have fired.
    pub next_run_at: Option<DateTime<Utc>>,

    /// Whether the job is paused. Stored explicitly rather than inferred
    /// from `next_run_at`.
    #[serde(default)]
    pub paused: bool,

    /// Seconds a fire may be late and still execute.
    #[serde(default = "default_misfire_grace_seconds")]
    pub misfire_grace_seconds: i64,

    /// Fold all missed fires within the grace window into one execution.
    #[serde(default = "default_coalesce")]
    pub coalesce: bool,

    /// Bound on concurrent executions of this job id.
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
}

impl JobSpec {
    /// Create a job with default execution policy, computing the first fire
    /// time from the trigger.
    #[must_use]
    pub fn new(
        id: JobId,
        func_ref: impl Into<String>,
        trigger: Trigger,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        let next_run_at = trigger.initial_fire(now);
        Self {
            id,
            func_ref: func_ref.into(),
            trigger,
            args,
            kwargs,
            next_run_at,
            paused: false,
            misfire_grace_seconds: DEFAULT_MISFIRE_GRACE_SECONDS,
            coalesce: default_coalesce(),
            max_instances: DEFAULT_MAX_INSTANCES,
        }
    }

    /// The misfire grace window as a duration.
    #[must_use]
    pub fn misfire_grace(&self) -> Duration {
        Duration::seconds(self.misfire_grace_seconds)
    }
}

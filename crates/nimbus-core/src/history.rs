//! Append-only job history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::ids::{HistoryId, JobId};
use crate::trigger::TriggerKind;

/// Lifecycle states recorded in the history table.
///
/// Transitions per job: `created → running → completed | failed`,
/// `created → paused → resumed`, `created → removed`, and `misfired` when a
/// fire was deferred past its grace window. Records are never updated in
/// place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// The job was added to the store.
    Created,
    /// An execution started.
    Running,
    /// An execution finished normally.
    Completed,
    /// An execution raised an error.
    Failed,
    /// The job was removed from the store.
    Removed,
    /// The job was paused.
    Paused,
    /// The job was resumed.
    Resumed,
    /// A fire elapsed beyond the grace window and was skipped.
    Misfired,
}

impl JobStatus {
    /// Stable string form used in the database column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Removed => "removed",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Misfired => "misfired",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "removed" => Ok(Self::Removed),
            "paused" => Ok(Self::Paused),
            "resumed" => Ok(Self::Resumed),
            "misfired" => Ok(Self::Misfired),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One row of the job history table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistoryRecord {
    /// Record identifier.
    pub id: HistoryId,
    /// The job this record belongs to.
    pub job_id: JobId,
    /// Function reference at the time of the transition.
    pub func_ref: String,
    /// Human-readable trigger representation.
    pub trigger_repr: String,
    /// Trigger kind.
    pub trigger_type: TriggerKind,
    /// The lifecycle state recorded.
    pub status: JobStatus,
    /// Positional arguments, if any.
    pub args: Option<Value>,
    /// Keyword arguments, if any.
    pub kwargs: Option<Value>,
    /// The job's next fire time when the transition happened.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Error message; required when `status` is [`JobStatus::Failed`].
    pub error_message: Option<String>,
    /// Captured execution output.
    pub logs: Option<String>,
    /// User who triggered the transition, when it came through the API.
    pub user_id: Option<String>,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

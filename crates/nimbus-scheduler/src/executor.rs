//! Single-invocation job execution.

use chrono::Utc;
use nimbus_core::{HistoryId, JobHistoryRecord, JobSpec, JobStatus};
use nimbus_store::PgStore;
use serde_json::Value;

use crate::logs::{JobContext, JobLogSink, JobLogStore};
use crate::registry::{JobError, JobHandler, JobRegistry};

/// Build a history record snapshotting the given job at `status`.
pub(crate) fn history_record(
    job: &JobSpec,
    status: JobStatus,
    user_id: Option<&str>,
) -> JobHistoryRecord {
    let args = if job.args.is_empty() {
        None
    } else {
        Some(Value::Array(job.args.clone()))
    };
    let kwargs = if job.kwargs.is_empty() {
        None
    } else {
        Some(Value::Object(job.kwargs.clone()))
    };
    JobHistoryRecord {
        id: HistoryId::generate(),
        job_id: job.id.clone(),
        func_ref: job.func_ref.clone(),
        trigger_repr: job.trigger.repr(),
        trigger_type: job.trigger.kind(),
        status,
        args,
        kwargs,
        next_run_at: job.next_run_at,
        error_message: None,
        logs: None,
        user_id: user_id.map(ToString::to_string),
        created_at: Utc::now(),
    }
}

/// Run one job invocation.
///
/// Resolves the function, records the `running` transition (best-effort: a
/// history failure must not abort the job), invokes the handler with a fresh
/// log sink, and always stashes the rendered logs for the listener before
/// returning the handler's outcome.
pub(crate) async fn execute(
    store: &PgStore,
    registry: &JobRegistry,
    log_store: &JobLogStore,
    job: &JobSpec,
) -> Result<(), JobError> {
    let handler = registry
        .resolve(&job.func_ref)
        .map_err(|e| JobError::new(e.to_string()))?;

    let running = history_record(job, JobStatus::Running, None);
    if let Err(e) = store.insert_history(&running).await {
        tracing::warn!(job_id = %job.id, error = %e, "Failed to record running transition");
    }

    let sink = JobLogSink::new();
    let ctx = JobContext::new(job.id.clone(), sink.clone());
    let args = job.args.clone();
    let kwargs = job.kwargs.clone();

    let result = match handler {
        JobHandler::Async(func) => func(ctx, args, kwargs).await,
        JobHandler::Blocking(func) => {
            match tokio::task::spawn_blocking(move || func(ctx, args, kwargs)).await {
                Ok(result) => result,
                Err(join) => Err(JobError::new(format!("job panicked: {join}"))),
            }
        }
    };

    if let Err(ref error) = result {
        tracing::error!(job_id = %job.id, error = %error, "Job execution failed");
        sink.stderr(error);
    }

    log_store.store(&job.id, sink.render());
    result
}

//! Per-execution log capture.
//!
//! Jobs receive a [`JobContext`] whose sink collects stdout-like,
//! stderr-like, and log-like lines into in-memory buffers. Capture is scoped
//! to one execution on one task, so concurrent jobs cannot interleave.
//! Rendered output lands in the [`JobLogStore`], a process-local map keyed
//! by job id; the history writer pops entries with bounded retries to
//! tolerate the write-before-read race between executor and listener.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nimbus_core::JobId;

/// How many times the history writer retries a missing log entry.
pub const LOG_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Delay between log retrieval retries.
pub const LOG_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Default)]
struct SinkBuffers {
    stdout: String,
    stderr: String,
    logs: String,
}

/// Collects one execution's output.
///
/// Cloning shares the underlying buffers, so a handler may hand the sink to
/// helper functions freely.
#[derive(Clone, Default)]
pub struct JobLogSink {
    inner: Arc<Mutex<SinkBuffers>>,
}

impl JobLogSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, pick: impl FnOnce(&mut SinkBuffers) -> &mut String, line: impl Display) {
        let mut buffers = self.inner.lock().expect("log sink poisoned");
        let buffer = pick(&mut buffers);
        buffer.push_str(&line.to_string());
        buffer.push('\n');
    }

    /// Append a stdout line.
    pub fn stdout(&self, line: impl Display) {
        self.push(|b| &mut b.stdout, line);
    }

    /// Append a stderr line.
    pub fn stderr(&self, line: impl Display) {
        self.push(|b| &mut b.stderr, line);
    }

    /// Append a log line.
    pub fn log(&self, line: impl Display) {
        self.push(|b| &mut b.logs, line);
    }

    /// Render the captured output: `STDOUT:` / `STDERR:` / `LOGS:` sections
    /// joined by blank lines, with empty sections omitted. Returns an empty
    /// string when nothing was captured.
    #[must_use]
    pub fn render(&self) -> String {
        let buffers = self.inner.lock().expect("log sink poisoned");
        let mut sections = Vec::new();
        if !buffers.stdout.is_empty() {
            sections.push(format!("STDOUT:\n{}", buffers.stdout));
        }
        if !buffers.stderr.is_empty() {
            sections.push(format!("STDERR:\n{}", buffers.stderr));
        }
        if !buffers.logs.is_empty() {
            sections.push(format!("LOGS:\n{}", buffers.logs));
        }
        sections.join("\n\n")
    }
}

/// Execution context handed to every job handler.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    sink: JobLogSink,
}

impl JobContext {
    /// Build a context for one execution.
    #[must_use]
    pub fn new(job_id: JobId, sink: JobLogSink) -> Self {
        Self { job_id, sink }
    }

    /// The id of the job being executed.
    #[must_use]
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Write a stdout line.
    pub fn stdout(&self, line: impl Display) {
        self.sink.stdout(line);
    }

    /// Write a stderr line.
    pub fn stderr(&self, line: impl Display) {
        self.sink.stderr(line);
    }

    /// Write a log line.
    pub fn log(&self, line: impl Display) {
        self.sink.log(line);
    }
}

/// Process-local map of rendered logs, keyed by job id.
///
/// Each execution writes its key once and the listener pops it once.
#[derive(Default)]
pub struct JobLogStore {
    entries: Mutex<HashMap<String, String>>,
}

impl JobLogStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stash rendered logs for a job execution.
    pub fn store(&self, job_id: &JobId, logs: String) {
        self.entries
            .lock()
            .expect("log store poisoned")
            .insert(job_id.as_str().to_string(), logs);
    }

    /// Remove and return the logs for a job, if present.
    pub fn take(&self, job_id: &JobId) -> Option<String> {
        self.entries
            .lock()
            .expect("log store poisoned")
            .remove(job_id.as_str())
    }

    /// Remove and return the logs for a job, retrying on a miss to cover
    /// the executor still being mid-write.
    pub async fn take_with_retry(&self, job_id: &JobId) -> Option<String> {
        if let Some(logs) = self.take(job_id) {
            return Some(logs);
        }
        for attempt in 1..=LOG_RETRY_MAX_ATTEMPTS {
            tokio::time::sleep(LOG_RETRY_DELAY).await;
            if let Some(logs) = self.take(job_id) {
                tracing::debug!(job_id = %job_id, attempt, "Retrieved logs after retry");
                return Some(logs);
            }
        }
        tracing::warn!(
            job_id = %job_id,
            attempts = LOG_RETRY_MAX_ATTEMPTS,
            "Logs not found after retries"
        );
        None
    }
}

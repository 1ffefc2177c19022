//! The job function registry.
//!
//! Persisted jobs reference their function as a `module:symbol` string. The
//! registry maps those strings to handlers registered at process startup, so
//! resolution is a lookup and unknown references fail when the job is
//! created rather than when it fires.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::error::{Result, SchedulerError};
use crate::logs::JobContext;

/// Positional arguments passed to a job function.
pub type JobArgs = Vec<Value>;

/// Keyword arguments passed to a job function.
pub type JobKwargs = Map<String, Value>;

/// A job function failure. The message becomes the history row's
/// `error_message`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    message: String,
}

impl JobError {
    /// Create a failure with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Result type for job functions.
pub type JobResult = std::result::Result<(), JobError>;

type AsyncJobFn =
    Arc<dyn Fn(JobContext, JobArgs, JobKwargs) -> BoxFuture<'static, JobResult> + Send + Sync>;
type BlockingJobFn = Arc<dyn Fn(JobContext, JobArgs, JobKwargs) -> JobResult + Send + Sync>;

/// A registered job handler.
///
/// Async handlers run on the scheduler's event loop; blocking handlers are
/// moved to a worker thread for the duration of the call.
#[derive(Clone)]
pub enum JobHandler {
    /// An async handler, awaited in place.
    Async(AsyncJobFn),
    /// A synchronous handler, run via `spawn_blocking`.
    Blocking(BlockingJobFn),
}

impl fmt::Debug for JobHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Async(_) => f.write_str("JobHandler::Async"),
            Self::Blocking(_) => f.write_str("JobHandler::Blocking"),
        }
    }
}

/// Process-wide registry of job functions, populated at startup.
#[derive(Default)]
pub struct JobRegistry {
    functions: RwLock<HashMap<String, JobHandler>>,
}

impl JobRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async job function under a `module:symbol` name.
    pub fn register_async<F, Fut>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(JobContext, JobArgs, JobKwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let name = name.into();
        let handler = JobHandler::Async(Arc::new(move |ctx, args, kwargs| {
            Box::pin(func(ctx, args, kwargs))
        }));
        self.insert(name, handler);
    }

    /// Register a synchronous job function under a `module:symbol` name.
    pub fn register_blocking<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(JobContext, JobArgs, JobKwargs) -> JobResult + Send + Sync + 'static,
    {
        self.insert(name.into(), JobHandler::Blocking(Arc::new(func)));
    }

    fn insert(&self, name: String, handler: JobHandler) {
        tracing::debug!(name = %name, "Registered job function");
        self.functions
            .write()
            .expect("registry poisoned")
            .insert(name, handler);
    }

    /// Resolve a function reference.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownFunction`] when the reference is not
    /// registered.
    pub fn resolve(&self, func_ref: &str) -> Result<JobHandler> {
        self.functions
            .read()
            .expect("registry poisoned")
            .get(func_ref)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownFunction(func_ref.to_string()))
    }

    /// Whether a reference is registered.
    #[must_use]
    pub fn contains(&self, func_ref: &str) -> bool {
        self.functions
            .read()
            .expect("registry poisoned")
            .contains_key(func_ref)
    }

    /// Names of all registered functions, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions
            .read()
            .expect("registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

//! The scheduler: fire loop, misfire policy, and the history listener.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use nimbus_core::{
    HistoryId, IntervalSpec, JobHistoryRecord, JobId, JobSpec, JobStatus, Trigger, TriggerKind,
};
use nimbus_store::{PgStore, StoreError};

use crate::error::{Result, SchedulerError};
use crate::executor::{self, history_record};
use crate::logs::JobLogStore;
use crate::registry::{JobArgs, JobKwargs, JobRegistry};

// ============================================================================
// Configuration
// ============================================================================

/// Tunables for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Default misfire grace applied to new jobs.
    pub misfire_grace: Duration,
    /// Persistence verification: read attempts after an add.
    pub persistence_verify_retries: u32,
    /// Persistence verification: delay between attempts.
    pub persistence_verify_delay: StdDuration,
    /// Upper bound on the fire loop's sleep between wakeups.
    pub max_sleep: StdDuration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            misfire_grace: Duration::seconds(3600),
            persistence_verify_retries: 5,
            persistence_verify_delay: StdDuration::from_millis(200),
            max_sleep: StdDuration::from_secs(30),
        }
    }
}

/// Whether a fire that is `now - scheduled` late falls outside the grace
/// window. A fire exactly at the grace boundary still executes.
pub(crate) fn is_misfire(
    now: DateTime<Utc>,
    scheduled: DateTime<Utc>,
    grace: Duration,
) -> bool {
    now - scheduled > grace
}

// ============================================================================
// Internal plumbing
// ============================================================================

struct ExecutionEvent {
    job_id: JobId,
    error: Option<String>,
}

/// Counts in-flight executions so shutdown can drain them.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Notify,
}

impl InFlight {
    fn inc(&self) {
        *self.count.lock().expect("in-flight counter poisoned") += 1;
    }

    fn dec(&self) {
        let mut count = self.count.lock().expect("in-flight counter poisoned");
        *count -= 1;
        if *count == 0 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if *self.count.lock().expect("in-flight counter poisoned") == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct Inner {
    store: Arc<PgStore>,
    registry: Arc<JobRegistry>,
    logs: Arc<JobLogStore>,
    config: SchedulerConfig,
    wake: Notify,
    shutdown_tx: watch::Sender<bool>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<ExecutionEvent>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ExecutionEvent>>>,
    running_counts: Mutex<HashMap<String, u32>>,
    in_flight: InFlight,
    started: AtomicBool,
    fire_handle: Mutex<Option<JoinHandle<()>>>,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
}

/// The persistent job scheduler.
///
/// Cloning is cheap; all clones share one engine.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Build a scheduler over the given store and registry.
    #[must_use]
    pub fn new(store: Arc<PgStore>, registry: Arc<JobRegistry>, config: SchedulerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                logs: Arc::new(JobLogStore::new()),
                config,
                wake: Notify::new(),
                shutdown_tx,
                events_tx: Mutex::new(Some(events_tx)),
                events_rx: Mutex::new(Some(events_rx)),
                running_counts: Mutex::new(HashMap::new()),
                in_flight: InFlight::default(),
                started: AtomicBool::new(false),
                fire_handle: Mutex::new(None),
                listener_handle: Mutex::new(None),
            }),
        }
    }

    /// The function registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    /// Spawn the fire loop and the history listener. Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Scheduler already running");
            return;
        }
        let rx = self
            .inner
            .events_rx
            .lock()
            .expect("events receiver poisoned")
            .take()
            .expect("scheduler restarted");
        let fire = tokio::spawn(Self::fire_loop(
            self.clone(),
            self.inner.shutdown_tx.subscribe(),
        ));
        let listen = tokio::spawn(Self::listener_loop(self.clone(), rx));
        *self.inner.fire_handle.lock().expect("fire handle poisoned") = Some(fire);
        *self
            .inner
            .listener_handle
            .lock()
            .expect("listener handle poisoned") = Some(listen);
        tracing::info!("Job scheduler started");
    }

    /// Stop the fire loop, drain in-flight executions, and flush the
    /// listener, in that order, so no execution is spawned after the drain.
    pub async fn shutdown(&self) {
        if !self.inner.started.load(Ordering::SeqCst) {
            tracing::warn!("Scheduler is not running");
            return;
        }
        let _ = self.inner.shutdown_tx.send(true);
        let fire = self
            .inner
            .fire_handle
            .lock()
            .expect("fire handle poisoned")
            .take();
        if let Some(handle) = fire {
            let _ = handle.await;
        }
        self.inner.in_flight.wait_idle().await;
        // Dropping the stored sender closes the channel once the drained
        // executions have released their clones; the listener then flushes
        // its queue and exits.
        self.inner
            .events_tx
            .lock()
            .expect("events sender poisoned")
            .take();
        let listener = self
            .inner
            .listener_handle
            .lock()
            .expect("listener handle poisoned")
            .take();
        if let Some(handle) = listener {
            let _ = handle.await;
        }
        tracing::info!("Job scheduler shut down");
    }

    // ========================================================================
    // Public API: job management
    // ========================================================================

    /// Add a job on a cron schedule.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::add_job`]; additionally fails on an invalid cron
    /// expression.
    pub async fn add_cron(
        &self,
        id: JobId,
        func_ref: &str,
        expr: &str,
        args: JobArgs,
        kwargs: JobKwargs,
        replace: bool,
        user_id: Option<&str>,
    ) -> Result<JobSpec> {
        let trigger = Trigger::cron(expr)?;
        self.add_job(JobSpec::new(id, func_ref, trigger, args, kwargs), replace, user_id)
            .await
    }

    /// Add a fixed-interval job.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::add_job`]; additionally fails on a zero-length
    /// period or inverted bounds.
    pub async fn add_interval(
        &self,
        id: JobId,
        func_ref: &str,
        interval: IntervalSpec,
        args: JobArgs,
        kwargs: JobKwargs,
        replace: bool,
        user_id: Option<&str>,
    ) -> Result<JobSpec> {
        let trigger = Trigger::interval(interval)?;
        self.add_job(JobSpec::new(id, func_ref, trigger, args, kwargs), replace, user_id)
            .await
    }

    /// Add a one-time job. With no run date the job fires immediately (a
    /// one-second buffer keeps it out of the past).
    ///
    /// # Errors
    ///
    /// See [`Scheduler::add_job`].
    pub async fn add_once(
        &self,
        id: JobId,
        func_ref: &str,
        run_at: Option<DateTime<Utc>>,
        args: JobArgs,
        kwargs: JobKwargs,
        replace: bool,
        user_id: Option<&str>,
    ) -> Result<JobSpec> {
        let now = Utc::now();
        let run_at = run_at.unwrap_or_else(|| now + Duration::seconds(1));
        if run_at < now && is_misfire(now, run_at, self.inner.config.misfire_grace) {
            tracing::warn!(
                job_id = %id,
                run_at = %run_at,
                "One-time job scheduled beyond the misfire grace window; it will be skipped"
            );
        }
        self.add_job(
            JobSpec::new(id, func_ref, Trigger::once(run_at), args, kwargs),
            replace,
            user_id,
        )
        .await
    }

    /// Add a fully-built job: resolve the function reference, persist the
    /// descriptor, verify the write, and record the `created` transition.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::UnknownFunction`] for an unregistered reference
    /// - [`SchedulerError::Conflict`] when the id exists without `replace`
    /// - [`SchedulerError::Persistence`] when the write never becomes
    ///   observable
    pub async fn add_job(
        &self,
        mut spec: JobSpec,
        replace: bool,
        user_id: Option<&str>,
    ) -> Result<JobSpec> {
        if !self.inner.registry.contains(&spec.func_ref) {
            return Err(SchedulerError::UnknownFunction(spec.func_ref.clone()));
        }
        spec.misfire_grace_seconds = self.inner.config.misfire_grace.num_seconds();

        self.inner
            .store
            .upsert_job(&spec, replace)
            .await
            .map_err(|e| match e {
                StoreError::Conflict { .. } => SchedulerError::Conflict(spec.id.clone()),
                other => SchedulerError::from(other),
            })?;

        self.verify_persistence(&spec.id).await?;

        self.inner
            .store
            .insert_history(&history_record(&spec, JobStatus::Created, user_id))
            .await?;

        tracing::info!(
            job_id = %spec.id,
            func_ref = %spec.func_ref,
            trigger = %spec.trigger.repr(),
            next_run_at = ?spec.next_run_at,
            "Job added"
        );
        self.inner.wake.notify_one();
        Ok(spec)
    }

    /// Fetch a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] on database failure.
    pub async fn get(&self, id: &JobId) -> Result<Option<JobSpec>> {
        Ok(self.inner.store.get_job(id).await?)
    }

    /// List all jobs, soonest fire first.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] on database failure.
    pub async fn list(&self) -> Result<Vec<JobSpec>> {
        Ok(self.inner.store.list_jobs().await?)
    }

    /// Pause a job: clear its fire time and record the transition.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] for an unknown id.
    pub async fn pause(&self, id: &JobId, user_id: Option<&str>) -> Result<JobSpec> {
        let mut job = self.get_required(id).await?;
        job.paused = true;
        job.next_run_at = None;
        self.set_paused(&job, user_id, JobStatus::Paused).await?;
        tracing::info!(job_id = %id, "Job paused");
        Ok(job)
    }

    /// Resume a paused job, recomputing its fire time from the trigger.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] for an unknown id.
    pub async fn resume(&self, id: &JobId, user_id: Option<&str>) -> Result<JobSpec> {
        let mut job = self.get_required(id).await?;
        job.paused = false;
        job.next_run_at = job.trigger.initial_fire(Utc::now());
        self.set_paused(&job, user_id, JobStatus::Resumed).await?;
        self.inner.wake.notify_one();
        tracing::info!(job_id = %id, next_run_at = ?job.next_run_at, "Job resumed");
        Ok(job)
    }

    /// Remove a job, recording the `removed` transition first.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] for an unknown id.
    pub async fn remove(&self, id: &JobId, user_id: Option<&str>) -> Result<()> {
        let job = self.get_required(id).await?;
        self.inner
            .store
            .insert_history(&history_record(&job, JobStatus::Removed, user_id))
            .await?;
        self.inner.store.delete_job(id).await?;
        tracing::info!(job_id = %id, "Job removed");
        Ok(())
    }

    /// List history rows, newest first, optionally filtered by job id.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] on database failure.
    pub async fn history(
        &self,
        job_id: Option<&JobId>,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<JobHistoryRecord>, i64)> {
        Ok(self.inner.store.list_history(job_id, page, page_size).await?)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn get_required(&self, id: &JobId) -> Result<JobSpec> {
        self.get(id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(id.clone()))
    }

    async fn set_paused(
        &self,
        job: &JobSpec,
        user_id: Option<&str>,
        status: JobStatus,
    ) -> Result<()> {
        self.inner
            .store
            .set_job_paused(&job.id, job.paused, job.next_run_at)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => SchedulerError::NotFound(job.id.clone()),
                other => SchedulerError::from(other),
            })?;
        self.inner
            .store
            .insert_history(&history_record(job, status, user_id))
            .await?;
        Ok(())
    }

    /// Re-read the store until the freshly-added job is visible, then fall
    /// back to the raw table (a long-running execution may have already
    /// claimed the row). Catches silent driver-level commit failures.
    async fn verify_persistence(&self, id: &JobId) -> Result<()> {
        let retries = self.inner.config.persistence_verify_retries;
        for attempt in 1..=retries {
            match self.inner.store.get_job(id).await {
                Ok(Some(_)) => {
                    tracing::debug!(job_id = %id, attempt, "Job verified in job store");
                    return Ok(());
                }
                Ok(None) => {
                    tracing::debug!(job_id = %id, attempt, retries, "Job not yet visible");
                }
                Err(e) => {
                    tracing::warn!(job_id = %id, attempt, error = %e, "Error verifying job");
                }
            }
            if attempt < retries {
                tokio::time::sleep(self.inner.config.persistence_verify_delay).await;
            }
        }
        match self.inner.store.raw_job_row_exists(id).await {
            Ok(true) => {
                tracing::info!(
                    job_id = %id,
                    "Job present in raw store table but not readable; acceptable for in-flight executions"
                );
                Ok(())
            }
            Ok(false) => {
                tracing::error!(job_id = %id, retries, "Job write not observable");
                Err(SchedulerError::Persistence {
                    job_id: id.clone(),
                    attempts: retries,
                })
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Raw store check failed");
                Err(SchedulerError::Persistence {
                    job_id: id.clone(),
                    attempts: retries,
                })
            }
        }
    }

    async fn fire_loop(this: Scheduler, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let sleep_for = this.sleep_duration().await;
            tokio::select! {
                _ = shutdown.changed() => {}
                () = this.inner.wake.notified() => {}
                () = tokio::time::sleep(sleep_for) => {}
            }
            if *shutdown.borrow() {
                break;
            }
            this.drain_due().await;
        }
        tracing::debug!("Fire loop stopped");
    }

    async fn sleep_duration(&self) -> StdDuration {
        match self.inner.store.next_wakeup().await {
            Ok(Some(next)) => {
                let now = Utc::now();
                if next <= now {
                    StdDuration::ZERO
                } else {
                    (next - now)
                        .to_std()
                        .unwrap_or(StdDuration::ZERO)
                        .min(self.inner.config.max_sleep)
                }
            }
            Ok(None) => self.inner.config.max_sleep,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to compute next wakeup");
                StdDuration::from_secs(1)
            }
        }
    }

    async fn drain_due(&self) {
        let now = Utc::now();
        let due = match self.inner.store.due_jobs(now).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "Due-job scan failed");
                return;
            }
        };
        for job in due {
            self.dispatch(job, now).await;
        }
    }

    /// Handle one due job: classify against the grace window, advance the
    /// stored fire time (coalescing all missed fires into this dispatch),
    /// and either execute or record a misfire.
    async fn dispatch(&self, job: JobSpec, now: DateTime<Utc>) {
        let Some(scheduled) = job.next_run_at else {
            return;
        };
        let next = match job.trigger.kind() {
            TriggerKind::Once => None,
            _ => job.trigger.next_fire_after(now),
        };

        if is_misfire(now, scheduled, job.misfire_grace()) {
            tracing::warn!(
                job_id = %job.id,
                scheduled = %scheduled,
                late_seconds = (now - scheduled).num_seconds(),
                "Fire missed beyond grace window"
            );
            let mut record = history_record(&job, JobStatus::Misfired, None);
            record.next_run_at = next;
            if let Err(e) = self.inner.store.insert_history(&record).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record misfire");
            }
            // A misfired one-time job is terminal and leaves the store.
            if job.trigger.kind() == TriggerKind::Once {
                if let Err(e) = self.inner.store.delete_job(&job.id).await {
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to remove misfired job");
                }
            } else {
                self.advance(&job, next).await;
            }
            return;
        }

        let permitted = {
            let mut counts = self
                .inner
                .running_counts
                .lock()
                .expect("running counts poisoned");
            let count = counts.entry(job.id.as_str().to_string()).or_insert(0);
            if *count >= job.max_instances {
                false
            } else {
                *count += 1;
                true
            }
        };

        self.advance(&job, next).await;

        if !permitted {
            tracing::warn!(
                job_id = %job.id,
                max_instances = job.max_instances,
                "Maximum concurrent instances reached; dropping fire"
            );
            return;
        }

        let events_tx = self
            .inner
            .events_tx
            .lock()
            .expect("events sender poisoned")
            .clone();
        let Some(events_tx) = events_tx else {
            tracing::warn!(job_id = %job.id, "Scheduler shutting down; dropping fire");
            self.release_slot(&job.id);
            return;
        };

        self.inner.in_flight.inc();
        let this = self.clone();
        tokio::spawn(async move {
            let result = executor::execute(
                &this.inner.store,
                &this.inner.registry,
                &this.inner.logs,
                &job,
            )
            .await;
            this.release_slot(&job.id);
            this.inner.in_flight.dec();
            let _ = events_tx.send(ExecutionEvent {
                job_id: job.id.clone(),
                error: result.err().map(|e| e.to_string()),
            });
        });
    }

    fn release_slot(&self, id: &JobId) {
        let mut counts = self
            .inner
            .running_counts
            .lock()
            .expect("running counts poisoned");
        if let Some(count) = counts.get_mut(id.as_str()) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(id.as_str());
            }
        }
    }

    /// Write the advanced fire time back, removing exhausted jobs (an
    /// interval whose end bound has passed simply leaves the store).
    async fn advance(&self, job: &JobSpec, next: Option<DateTime<Utc>>) {
        let result = match (job.trigger.kind(), next) {
            // The row stays until the listener records the terminal state.
            (TriggerKind::Once, _) => self.inner.store.set_job_next_run(&job.id, None).await,
            (_, Some(next)) => self.inner.store.set_job_next_run(&job.id, Some(next)).await,
            (_, None) => {
                tracing::info!(job_id = %job.id, "Trigger exhausted; removing job");
                self.inner.store.delete_job(&job.id).await.map(|_| ())
            }
        };
        if let Err(e) = result {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to advance job");
        }
    }

    async fn listener_loop(this: Scheduler, mut rx: mpsc::UnboundedReceiver<ExecutionEvent>) {
        while let Some(event) = rx.recv().await {
            if let Err(e) = this.handle_event(&event).await {
                tracing::error!(
                    job_id = %event.job_id,
                    error = %e,
                    "Job listener failed; loop continues"
                );
            }
        }
        tracing::debug!("Listener loop stopped");
    }

    /// Write the terminal history row for one execution and clean up
    /// finished one-time jobs.
    async fn handle_event(&self, event: &ExecutionEvent) -> Result<()> {
        let status = if event.error.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };

        // Reconstruct job context from the live store, or from the most
        // recent history row for one-time jobs already gone.
        let mut record = match self.inner.store.get_job(&event.job_id).await? {
            Some(spec) => history_record(&spec, status, None),
            None => match self.inner.store.latest_history_for(&event.job_id).await? {
                Some(prev) => JobHistoryRecord {
                    id: HistoryId::generate(),
                    job_id: event.job_id.clone(),
                    func_ref: prev.func_ref,
                    trigger_repr: prev.trigger_repr,
                    trigger_type: prev.trigger_type,
                    status,
                    args: prev.args,
                    kwargs: prev.kwargs,
                    next_run_at: None,
                    error_message: None,
                    logs: None,
                    user_id: None,
                    created_at: Utc::now(),
                },
                None => {
                    tracing::warn!(job_id = %event.job_id, "No context found for finished job");
                    JobHistoryRecord {
                        id: HistoryId::generate(),
                        job_id: event.job_id.clone(),
                        func_ref: "<unknown>".into(),
                        trigger_repr: "<unknown>".into(),
                        trigger_type: TriggerKind::Once,
                        status,
                        args: None,
                        kwargs: None,
                        next_run_at: None,
                        error_message: None,
                        logs: None,
                        user_id: None,
                        created_at: Utc::now(),
                    }
                }
            },
        };

        record.logs = self.inner.logs.take_with_retry(&event.job_id).await;
        if status == JobStatus::Failed {
            record.error_message = Some(
                event
                    .error
                    .clone()
                    .unwrap_or_else(|| "job failed".to_string()),
            );
        }

        self.inner.store.insert_history(&record).await?;
        tracing::debug!(
            job_id = %event.job_id,
            status = %status,
            logs = record.logs.is_some(),
            "Terminal transition recorded"
        );

        // One-time jobs leave the store once a terminal row exists, even if
        // the fire loop has not cleaned up yet.
        if record.trigger_type == TriggerKind::Once
            && self.inner.store.delete_job(&event.job_id).await?
        {
            tracing::debug!(job_id = %event.job_id, "One-time job removed after completion");
        }
        Ok(())
    }
}

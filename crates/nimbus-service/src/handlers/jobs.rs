//! Scheduler CRUD and history routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use nimbus_core::{IntervalSpec, JobHistoryRecord, JobId, JobSpec};

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Schemas
// ============================================================================

/// Body of `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct JobCreateRequest {
    /// Unique job id.
    pub job_id: String,
    /// Function reference (`module:symbol`).
    pub function: String,
    /// `cron`, `interval`, or `once`.
    pub trigger_type: String,
    /// Cron expression; required for `cron`.
    #[serde(default)]
    pub cron_expression: Option<String>,
    /// Interval period: weeks.
    #[serde(default)]
    pub weeks: u32,
    /// Interval period: days.
    #[serde(default)]
    pub days: u32,
    /// Interval period: hours.
    #[serde(default)]
    pub hours: u32,
    /// Interval period: minutes.
    #[serde(default)]
    pub minutes: u32,
    /// Interval period: seconds.
    #[serde(default)]
    pub seconds: u32,
    /// Interval start bound.
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// Interval end bound.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Run date for `once`; defaults to immediate execution.
    #[serde(default)]
    pub run_date: Option<DateTime<Utc>>,
    /// Positional arguments for the function.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments for the function.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    /// Replace an existing job with the same id.
    #[serde(default = "default_replace")]
    pub replace_existing: bool,
}

fn default_replace() -> bool {
    true
}

/// A job as returned by the API.
#[derive(Debug, Serialize)]
#[allow(missing_docs)]
pub struct JobResponse {
    pub id: String,
    pub function: String,
    pub func_ref: String,
    pub trigger: String,
    pub trigger_type: String,
    pub next_run_time: Option<DateTime<Utc>>,
    pub paused: bool,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl From<JobSpec> for JobResponse {
    fn from(spec: JobSpec) -> Self {
        Self {
            id: spec.id.to_string(),
            function: short_name(&spec.func_ref),
            func_ref: spec.func_ref.clone(),
            trigger: spec.trigger.repr(),
            trigger_type: spec.trigger.kind().as_str().to_string(),
            next_run_time: spec.next_run_at,
            paused: spec.paused,
            args: spec.args,
            kwargs: spec.kwargs,
        }
    }
}

/// Pagination query for listings.
#[derive(Debug, Deserialize)]
#[allow(missing_docs)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    10
}

/// Query for `GET /jobs/history`.
#[derive(Debug, Deserialize)]
#[allow(missing_docs)]
pub struct HistoryQuery {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Paginated job listing.
#[derive(Debug, Serialize)]
#[allow(missing_docs)]
pub struct JobListResponse {
    pub items: Vec<JobResponse>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

/// One history row as returned by the API.
#[derive(Debug, Serialize)]
#[allow(missing_docs)]
pub struct JobHistoryResponse {
    pub id: String,
    pub job_id: String,
    pub function: String,
    pub func_ref: String,
    pub trigger: String,
    pub trigger_type: String,
    pub status: String,
    pub args: Option<Value>,
    pub kwargs: Option<Value>,
    pub next_run_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub logs: Option<String>,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<JobHistoryRecord> for JobHistoryResponse {
    fn from(record: JobHistoryRecord) -> Self {
        Self {
            id: record.id.to_string(),
            job_id: record.job_id.to_string(),
            function: short_name(&record.func_ref),
            func_ref: record.func_ref,
            trigger: record.trigger_repr,
            trigger_type: record.trigger_type.as_str().to_string(),
            status: record.status.as_str().to_string(),
            args: record.args,
            kwargs: record.kwargs,
            next_run_time: record.next_run_at,
            error_message: record.error_message,
            logs: record.logs,
            user_id: record.user_id,
            created_at: record.created_at,
        }
    }
}

/// Paginated history listing.
#[derive(Debug, Serialize)]
#[allow(missing_docs)]
pub struct JobHistoryListResponse {
    pub items: Vec<JobHistoryResponse>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

fn short_name(func_ref: &str) -> String {
    func_ref
        .rsplit(':')
        .next()
        .unwrap_or(func_ref)
        .to_string()
}

fn total_pages(total: i64, page_size: u32) -> u32 {
    if total <= 0 || page_size == 0 {
        return 0;
    }
    let pages = (total + i64::from(page_size) - 1) / i64::from(page_size);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::new(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /jobs` - create a scheduled, interval, or one-time job.
pub async fn create(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Json(body): Json<JobCreateRequest>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let job_id = parse_job_id(&body.job_id)?;
    let user_id = Some(principal.user_id.as_str());

    let job = match body.trigger_type.as_str() {
        "cron" => {
            let expr = body
                .cron_expression
                .as_deref()
                .filter(|expr| !expr.trim().is_empty())
                .ok_or_else(|| {
                    ApiError::BadRequest("cron trigger requires a cron_expression".into())
                })?;
            state
                .scheduler
                .add_cron(
                    job_id,
                    &body.function,
                    expr,
                    body.args,
                    body.kwargs,
                    body.replace_existing,
                    user_id,
                )
                .await?
        }
        "interval" => {
            let interval = IntervalSpec {
                weeks: body.weeks,
                days: body.days,
                hours: body.hours,
                minutes: body.minutes,
                seconds: body.seconds,
                start: body.start_date,
                end: body.end_date,
            };
            state
                .scheduler
                .add_interval(
                    job_id,
                    &body.function,
                    interval,
                    body.args,
                    body.kwargs,
                    body.replace_existing,
                    user_id,
                )
                .await?
        }
        "once" => {
            state
                .scheduler
                .add_once(
                    job_id,
                    &body.function,
                    body.run_date,
                    body.args,
                    body.kwargs,
                    body.replace_existing,
                    user_id,
                )
                .await?
        }
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown trigger type: {other}"
            )));
        }
    };

    Ok((StatusCode::CREATED, Json(JobResponse::from(job))))
}

/// `GET /jobs` - list jobs with pagination.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let all = state.scheduler.list().await?;
    let total = all.len();
    let page_size = query.page_size.clamp(1, 100);
    let page = query.page.max(1);
    let offset = (page as usize - 1) * page_size as usize;
    let items: Vec<JobResponse> = all
        .into_iter()
        .skip(offset)
        .take(page_size as usize)
        .map(JobResponse::from)
        .collect();

    Ok(Json(JobListResponse {
        items,
        total,
        page,
        page_size,
        total_pages: total_pages(i64::try_from(total).unwrap_or(i64::MAX), page_size),
    }))
}

/// `GET /jobs/history` - paginated history with optional job filter.
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<JobHistoryListResponse>, ApiError> {
    let job_id = query.job_id.as_deref().map(parse_job_id).transpose()?;
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);
    let (records, total) = state
        .scheduler
        .history(job_id.as_ref(), page, page_size)
        .await?;

    Ok(Json(JobHistoryListResponse {
        items: records.into_iter().map(JobHistoryResponse::from).collect(),
        total,
        page,
        page_size,
        total_pages: total_pages(total, page_size),
    }))
}

/// `GET /jobs/:id` - fetch one job.
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job_id = parse_job_id(&id)?;
    let job = state
        .scheduler
        .get(&job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {job_id}")))?;
    Ok(Json(JobResponse::from(job)))
}

/// `DELETE /jobs/:id` - remove a job.
pub async fn remove(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let job_id = parse_job_id(&id)?;
    state
        .scheduler
        .remove(&job_id, Some(&principal.user_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /jobs/:id/pause`.
pub async fn pause(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job_id = parse_job_id(&id)?;
    let job = state
        .scheduler
        .pause(&job_id, Some(&principal.user_id))
        .await?;
    Ok(Json(JobResponse::from(job)))
}

/// `POST /jobs/:id/resume`.
pub async fn resume(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job_id = parse_job_id(&id)?;
    let job = state
        .scheduler
        .resume(&job_id, Some(&principal.user_id))
        .await?;
    Ok(Json(JobResponse::from(job)))
}

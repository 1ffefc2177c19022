//! The append-only job history table.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use nimbus_core::{HistoryId, JobHistoryRecord, JobId, JobStatus, TriggerKind};

use crate::error::{Result, StoreError};
use crate::PgStore;

#[derive(FromRow)]
struct HistoryRow {
    id: Uuid,
    job_id: String,
    func_ref: String,
    trigger_repr: String,
    trigger_type: String,
    status: String,
    args: Option<serde_json::Value>,
    kwargs: Option<serde_json::Value>,
    next_run_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    logs: Option<String>,
    user_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for JobHistoryRecord {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self> {
        let status: JobStatus = row
            .status
            .parse()
            .map_err(StoreError::Serialization)?;
        let trigger_type: TriggerKind =
            serde_json::from_value(serde_json::Value::String(row.trigger_type))?;
        Ok(Self {
            id: HistoryId::from_uuid(row.id),
            job_id: JobId::new(row.job_id).map_err(|e| StoreError::Serialization(e.to_string()))?,
            func_ref: row.func_ref,
            trigger_repr: row.trigger_repr,
            trigger_type,
            status,
            args: row.args,
            kwargs: row.kwargs,
            next_run_at: row.next_run_at,
            error_message: row.error_message,
            logs: row.logs,
            user_id: row.user_id,
            created_at: row.created_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, job_id, func_ref, trigger_repr, trigger_type, status, \
     args, kwargs, next_run_at, error_message, logs, user_id, created_at";

impl PgStore {
    /// Append a history row. Rows are never updated in place.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`].
    pub async fn insert_history(&self, record: &JobHistoryRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_history \
             (id, job_id, func_ref, trigger_repr, trigger_type, status, args, kwargs, \
              next_run_at, error_message, logs, user_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(record.id.as_uuid())
        .bind(record.job_id.as_str())
        .bind(&record.func_ref)
        .bind(&record.trigger_repr)
        .bind(record.trigger_type.as_str())
        .bind(record.status.as_str())
        .bind(&record.args)
        .bind(&record.kwargs)
        .bind(record.next_run_at)
        .bind(&record.error_message)
        .bind(&record.logs)
        .bind(&record.user_id)
        .bind(record.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// List history rows, newest first, with an optional job filter.
    /// Pagination is 1-indexed. Returns the page plus the total count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] / [`StoreError::Serialization`].
    pub async fn list_history(
        &self,
        job_id: Option<&JobId>,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<JobHistoryRecord>, i64)> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);

        let total: i64 = match job_id {
            Some(id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM job_history WHERE job_id = $1")
                    .bind(id.as_str())
                    .fetch_one(self.pool())
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM job_history")
                    .fetch_one(self.pool())
                    .await?
            }
        };

        let rows: Vec<HistoryRow> = match job_id {
            Some(id) => {
                sqlx::query_as(&format!(
                    "SELECT {SELECT_COLUMNS} FROM job_history WHERE job_id = $1 \
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3"
                ))
                .bind(id.as_str())
                .bind(i64::from(page_size))
                .bind(offset)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {SELECT_COLUMNS} FROM job_history \
                     ORDER BY created_at DESC LIMIT $1 OFFSET $2"
                ))
                .bind(i64::from(page_size))
                .bind(offset)
                .fetch_all(self.pool())
                .await?
            }
        };

        let records = rows
            .into_iter()
            .map(JobHistoryRecord::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok((records, total))
    }

    /// The most recent history row for a job. Used by the execution listener
    /// to reconstruct context for `once` jobs already gone from the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] / [`StoreError::Serialization`].
    pub async fn latest_history_for(&self, job_id: &JobId) -> Result<Option<JobHistoryRecord>> {
        let row: Option<HistoryRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM job_history WHERE job_id = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(job_id.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.map(JobHistoryRecord::try_from).transpose()
    }
}

//! The scheduler's durable job table.
//!
//! Rows hold the serialized [`JobSpec`] as JSONB plus projected
//! `next_run_time` and `paused` columns. The projections and the payload are
//! updated together so either view of a job is authoritative.

use chrono::{DateTime, Utc};
use nimbus_core::{JobId, JobSpec};

use crate::error::{Result, StoreError};
use crate::PgStore;

impl PgStore {
    /// Insert a job, or replace an existing one when `replace` is set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the id exists and `replace` is
    /// false.
    pub async fn upsert_job(&self, spec: &JobSpec, replace: bool) -> Result<()> {
        let payload = serde_json::to_value(spec)?;
        let table = self.jobs_table();
        let sql = if replace {
            format!(
                "INSERT INTO \"{table}\" (id, next_run_time, paused, job_state) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (id) DO UPDATE SET \
                 next_run_time = EXCLUDED.next_run_time, \
                 paused = EXCLUDED.paused, \
                 job_state = EXCLUDED.job_state"
            )
        } else {
            format!(
                "INSERT INTO \"{table}\" (id, next_run_time, paused, job_state) \
                 VALUES ($1, $2, $3, $4)"
            )
        };
        sqlx::query(&sql)
            .bind(spec.id.as_str())
            .bind(spec.next_run_at)
            .bind(spec.paused)
            .bind(&payload)
            .execute(self.pool())
            .await
            .map_err(|e| StoreError::on_insert(e, "job", spec.id.as_str()))?;
        Ok(())
    }

    /// Fetch a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] / [`StoreError::Serialization`].
    pub async fn get_job(&self, id: &JobId) -> Result<Option<JobSpec>> {
        let table = self.jobs_table();
        let sql = format!("SELECT job_state FROM \"{table}\" WHERE id = $1");
        let row: Option<serde_json::Value> = sqlx::query_scalar(&sql)
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await?;
        row.map(|state| serde_json::from_value(state).map_err(StoreError::from))
            .transpose()
    }

    /// List every job, ordered by next fire time (unscheduled last), then
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] / [`StoreError::Serialization`].
    pub async fn list_jobs(&self) -> Result<Vec<JobSpec>> {
        let table = self.jobs_table();
        let sql = format!(
            "SELECT job_state FROM \"{table}\" \
             ORDER BY next_run_time ASC NULLS LAST, seq ASC"
        );
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(&sql).fetch_all(self.pool()).await?;
        rows.into_iter()
            .map(|state| serde_json::from_value(state).map_err(StoreError::from))
            .collect()
    }

    /// Jobs whose fire time has come: not paused, `next_run_time <= now`.
    /// Ordered by fire time with insertion order as tie-break.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] / [`StoreError::Serialization`].
    pub async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<JobSpec>> {
        let table = self.jobs_table();
        let sql = format!(
            "SELECT job_state FROM \"{table}\" \
             WHERE NOT paused AND next_run_time IS NOT NULL AND next_run_time <= $1 \
             ORDER BY next_run_time ASC, seq ASC"
        );
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(&sql)
            .bind(now)
            .fetch_all(self.pool())
            .await?;
        rows.into_iter()
            .map(|state| serde_json::from_value(state).map_err(StoreError::from))
            .collect()
    }

    /// The earliest pending fire time across all runnable jobs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`].
    pub async fn next_wakeup(&self) -> Result<Option<DateTime<Utc>>> {
        let table = self.jobs_table();
        let sql = format!(
            "SELECT MIN(next_run_time) FROM \"{table}\" \
             WHERE NOT paused AND next_run_time IS NOT NULL"
        );
        let min: Option<DateTime<Utc>> = sqlx::query_scalar(&sql).fetch_one(self.pool()).await?;
        Ok(min)
    }

    /// Advance (or clear) a job's next fire time, in the projection and the
    /// payload together.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the job is gone.
    pub async fn set_job_next_run(
        &self,
        id: &JobId,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let table = self.jobs_table();
        let sql = format!(
            "UPDATE \"{table}\" SET \
             next_run_time = $2, \
             job_state = job_state || jsonb_build_object('next_run_at', $2::timestamptz) \
             WHERE id = $1"
        );
        let result = sqlx::query(&sql)
            .bind(id.as_str())
            .bind(next_run_at)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "job",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Flip the paused flag, clearing or restoring the fire time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the job is gone.
    pub async fn set_job_paused(
        &self,
        id: &JobId,
        paused: bool,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let table = self.jobs_table();
        let sql = format!(
            "UPDATE \"{table}\" SET \
             paused = $2, \
             next_run_time = $3, \
             job_state = job_state \
                 || jsonb_build_object('paused', $2) \
                 || jsonb_build_object('next_run_at', $3::timestamptz) \
             WHERE id = $1"
        );
        let result = sqlx::query(&sql)
            .bind(id.as_str())
            .bind(paused)
            .bind(next_run_at)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "job",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Delete a job row. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`].
    pub async fn delete_job(&self, id: &JobId) -> Result<bool> {
        let table = self.jobs_table();
        let sql = format!("DELETE FROM \"{table}\" WHERE id = $1");
        let result = sqlx::query(&sql)
            .bind(id.as_str())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Check the raw table for a row without touching the payload. The
    /// scheduler's persistence verification falls back to this when the
    /// deserializing read misses.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`].
    pub async fn raw_job_row_exists(&self, id: &JobId) -> Result<bool> {
        let table = self.jobs_table();
        let sql = format!("SELECT EXISTS(SELECT 1 FROM \"{table}\" WHERE id = $1)");
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(id.as_str())
            .fetch_one(self.pool())
            .await?;
        Ok(exists)
    }
}

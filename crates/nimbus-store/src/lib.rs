//! PostgreSQL storage layer for nimbus.
//!
//! One [`PgStore`] owns the connection pool and exposes three groups of
//! operations, each in its own module:
//!
//! - `jobs`: the scheduler's durable job table (opaque JSONB payload plus
//!   projected `next_run_time`/`paused` columns)
//! - `history`: the append-only job history table
//! - `conversations`: chat conversations and messages, including the
//!   row-locked variants the streaming coordinator uses
//!
//! Schema migrations are embedded via [`MIGRATOR`] and applied at startup.
//! All queries are runtime-checked (`sqlx::query`), so building the crate
//! does not require a database.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod conversations;
pub mod error;
pub mod history;
pub mod jobs;

pub use error::{Result, StoreError};

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Default name of the scheduler's job table.
pub const DEFAULT_JOBS_TABLE: &str = "scheduled_jobs";

/// Pool and schema settings for [`PgStore::connect`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PostgreSQL connection string.
    pub url: String,
    /// Maximum pool size.
    pub max_connections: u32,
    /// How long an acquire may wait for a connection.
    pub acquire_timeout: Duration,
    /// Recycle connections older than this.
    pub max_lifetime: Option<Duration>,
    /// Schema set as `search_path` on every connection, when configured.
    pub schema: Option<String>,
    /// Name of the scheduler's job table.
    pub jobs_table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/nimbus".into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Some(Duration::from_secs(1800)),
            schema: None,
            jobs_table: DEFAULT_JOBS_TABLE.into(),
        }
    }
}

/// PostgreSQL-backed store for jobs, history, and conversations.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    jobs_table: String,
}

impl PgStore {
    /// Connect a pool with the given settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the pool cannot be built.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout);
        if let Some(lifetime) = config.max_lifetime {
            options = options.max_lifetime(lifetime);
        }
        if let Some(schema) = config.schema.clone() {
            options = options.after_connect(move |conn, _meta| {
                let schema = schema.clone();
                Box::pin(async move {
                    sqlx::query(&format!("SET search_path TO \"{schema}\""))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            });
        }
        let pool = options.connect(&config.url).await?;
        tracing::info!(
            max_connections = config.max_connections,
            schema = ?config.schema,
            "Connected PostgreSQL pool"
        );
        Ok(Self {
            pool,
            jobs_table: config.jobs_table.clone(),
        })
    }

    /// Wrap an existing pool (used by tests and the service harness).
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            jobs_table: DEFAULT_JOBS_TABLE.into(),
        }
    }

    /// Override the scheduler job table name.
    #[must_use]
    pub fn with_jobs_table(mut self, name: impl Into<String>) -> Self {
        self.jobs_table = name.into();
        self
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The configured job table name.
    #[must_use]
    pub fn jobs_table(&self) -> &str {
        &self.jobs_table
    }

    /// Apply embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// Begin a transaction. Used by the chat coordinator to hold a row lock
    /// across check-then-insert sequences.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when no connection is available.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

//! Service configuration.

use std::collections::HashSet;
use std::time::Duration;

use nimbus_store::{StoreConfig, DEFAULT_JOBS_TABLE};

/// Routes that bypass authentication.
pub const PUBLIC_PATHS: [&str; 5] = ["/", "/health", "/docs", "/openapi.json", "/redoc"];

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8000").
    pub listen_addr: String,

    /// Base log level applied when `RUST_LOG` is unset (default: "info").
    pub log_level: String,

    /// Emit JSON-formatted logs (default: false).
    pub log_format_json: bool,

    /// Identity provider base URL. JWKS and API-key verification endpoints
    /// derive from it.
    pub identity_provider_url: String,

    /// Expected JWT issuer (default: the identity provider URL).
    pub jwt_issuer: String,

    /// Expected JWT audience (default: the identity provider URL).
    pub jwt_audience: String,

    /// JWKS cache lifetime in seconds (default: 3600).
    pub jwks_cache_ttl: Duration,

    /// PostgreSQL connection string.
    pub database_url: String,

    /// Pool size.
    pub database_max_connections: u32,

    /// Acquire timeout.
    pub database_acquire_timeout: Duration,

    /// Connection recycle age.
    pub database_max_lifetime: Option<Duration>,

    /// Schema applied as `search_path`, when set.
    pub database_schema: Option<String>,

    /// Scheduler job table name (default: "scheduled_jobs").
    pub job_store_table: String,

    /// Misfire grace window in seconds (default: 3600).
    pub job_misfire_grace_seconds: i64,

    /// Persistence verification read attempts (default: 5).
    pub job_persistence_verify_retries: u32,

    /// Delay between persistence verification reads (default: 200ms).
    pub job_persistence_verify_delay: Duration,

    /// LLM backend base URL (default: "http://localhost:11434").
    pub llm_base_url: String,

    /// Default chat model (default: "llama3:8b").
    pub llm_default_model: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes (default: 1MB).
    pub max_body_bytes: usize,

    /// Request timeout for non-streaming routes, in seconds (default: 30).
    pub request_timeout_seconds: u64,

    /// Paths that bypass authentication.
    pub public_paths: HashSet<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let identity_provider_url = std::env::var("IDENTITY_PROVIDER_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into());
        let identity_provider_url = identity_provider_url.trim_end_matches('/').to_string();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".into()),
            log_level: std::env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "info".into())
                .to_lowercase(),
            log_format_json: std::env::var("LOG_FORMAT_JSON")
                .is_ok_and(|s| s.to_lowercase() == "true"),
            jwt_issuer: std::env::var("JWT_ISSUER")
                .unwrap_or_else(|_| identity_provider_url.clone()),
            jwt_audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| identity_provider_url.clone()),
            jwks_cache_ttl: Duration::from_secs(env_parse("JWKS_CACHE_TTL_SECONDS", 3600)),
            identity_provider_url,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/nimbus".into()),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
            database_acquire_timeout: Duration::from_secs(env_parse(
                "DATABASE_ACQUIRE_TIMEOUT_SECONDS",
                30,
            )),
            database_max_lifetime: Some(Duration::from_secs(env_parse(
                "DATABASE_MAX_LIFETIME_SECONDS",
                1800,
            ))),
            database_schema: std::env::var("DATABASE_SCHEMA").ok(),
            job_store_table: std::env::var("JOB_STORE_TABLE_NAME")
                .unwrap_or_else(|_| DEFAULT_JOBS_TABLE.into()),
            job_misfire_grace_seconds: env_parse("JOB_MISFIRE_GRACE_SECONDS", 3600),
            job_persistence_verify_retries: env_parse("JOB_PERSISTENCE_VERIFY_RETRIES", 5),
            job_persistence_verify_delay: Duration::from_millis(env_parse(
                "JOB_PERSISTENCE_VERIFY_DELAY_MS",
                200,
            )),
            llm_base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".into()),
            llm_default_model: std::env::var("LLM_DEFAULT_MODEL")
                .unwrap_or_else(|_| "llama3:8b".into()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES", 1024 * 1024),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS", 30),
            public_paths: PUBLIC_PATHS.iter().map(ToString::to_string).collect(),
        }
    }

    /// The identity provider's JWKS endpoint.
    #[must_use]
    pub fn jwks_url(&self) -> String {
        format!("{}/api/auth/jwks", self.identity_provider_url)
    }

    /// The identity provider's API-key verification endpoint.
    #[must_use]
    pub fn api_key_verify_url(&self) -> String {
        format!("{}/api/auth/api-key/verify", self.identity_provider_url)
    }

    /// Storage settings derived from this configuration.
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            url: self.database_url.clone(),
            max_connections: self.database_max_connections,
            acquire_timeout: self.database_acquire_timeout,
            max_lifetime: self.database_max_lifetime,
            schema: self.database_schema.clone(),
            jobs_table: self.job_store_table.clone(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let identity_provider_url = "http://localhost:3000".to_string();
        Self {
            listen_addr: "0.0.0.0:8000".into(),
            log_level: "info".into(),
            log_format_json: false,
            jwt_issuer: identity_provider_url.clone(),
            jwt_audience: identity_provider_url.clone(),
            jwks_cache_ttl: Duration::from_secs(3600),
            identity_provider_url,
            database_url: "postgres://localhost/nimbus".into(),
            database_max_connections: 10,
            database_acquire_timeout: Duration::from_secs(30),
            database_max_lifetime: Some(Duration::from_secs(1800)),
            database_schema: None,
            job_store_table: DEFAULT_JOBS_TABLE.into(),
            job_misfire_grace_seconds: 3600,
            job_persistence_verify_retries: 5,
            job_persistence_verify_delay: Duration::from_millis(200),
            llm_base_url: "http://localhost:11434".into(),
            llm_default_model: "llama3:8b".into(),
            cors_origins: vec!["http://localhost:3000".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            public_paths: PUBLIC_PATHS.iter().map(ToString::to_string).collect(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

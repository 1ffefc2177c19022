//! Application state.

use std::sync::Arc;
use std::time::Duration;

use nimbus_llm::LlmClient;
use nimbus_scheduler::{JobRegistry, Scheduler, SchedulerConfig};
use nimbus_store::PgStore;

use crate::auth::{Authenticator, JwksCache};
use crate::config::ServiceConfig;

/// Timeout for identity provider calls (JWKS fetch, API-key verify).
const IDENTITY_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Arc<ServiceConfig>,

    /// The storage layer.
    pub store: Arc<PgStore>,

    /// Credential verification.
    pub authenticator: Arc<Authenticator>,

    /// The JWKS cache (shared with the authenticator; the health probe and
    /// tests reach it directly).
    pub jwks: Arc<JwksCache>,

    /// The job scheduler.
    pub scheduler: Scheduler,

    /// LLM backend client.
    pub llm: Arc<LlmClient>,

    /// Outbound HTTP client for identity provider calls.
    pub http: reqwest::Client,
}

impl AppState {
    /// Wire up the application components in dependency order: HTTP client,
    /// JWKS cache, authenticator, registry, scheduler.
    #[must_use]
    pub fn new(config: ServiceConfig, store: Arc<PgStore>, llm: Arc<LlmClient>) -> Self {
        let config = Arc::new(config);

        let http = reqwest::Client::builder()
            .timeout(IDENTITY_PROVIDER_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let jwks = Arc::new(JwksCache::new(
            http.clone(),
            config.jwks_url(),
            config.jwks_cache_ttl,
        ));
        let authenticator = Arc::new(Authenticator::new(Arc::clone(&jwks), http.clone(), &config));

        let registry = Arc::new(JobRegistry::new());
        crate::jobs::register_builtin_jobs(&registry);

        let scheduler = Scheduler::new(
            Arc::clone(&store),
            registry,
            SchedulerConfig {
                misfire_grace: chrono::Duration::seconds(config.job_misfire_grace_seconds),
                persistence_verify_retries: config.job_persistence_verify_retries,
                persistence_verify_delay: config.job_persistence_verify_delay,
                ..SchedulerConfig::default()
            },
        );

        Self {
            config,
            store,
            authenticator,
            jwks,
            scheduler,
            llm,
            http,
        }
    }
}

//! Nimbus service entry point.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nimbus_llm::LlmClient;
use nimbus_service::{create_router, AppState, ServiceConfig};
use nimbus_store::PgStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration first: logging setup reads its level and format from it.
    let config = ServiceConfig::from_env();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("{},nimbus=debug", config.log_level))
    });
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Nimbus Service");
    tracing::info!(
        listen_addr = %config.listen_addr,
        identity_provider = %config.identity_provider_url,
        llm_base_url = %config.llm_base_url,
        job_store_table = %config.job_store_table,
        "Service configuration loaded"
    );

    // Database pool and migrations.
    let store = Arc::new(PgStore::connect(&config.store_config()).await?);
    store.migrate().await?;

    // LLM backend client.
    let llm = Arc::new(LlmClient::new(
        config.llm_base_url.clone(),
        config.llm_default_model.clone(),
    )?);

    // Application state: HTTP client, JWKS cache, authenticator, scheduler.
    let state = AppState::new(config.clone(), Arc::clone(&store), llm);

    // Start the scheduler before accepting traffic so persisted jobs fire.
    let scheduler = state.scheduler.clone();
    scheduler.start();

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Teardown reverses startup: drain the scheduler, then close the pool.
    tracing::info!("Shutting down");
    scheduler.shutdown().await;
    store.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

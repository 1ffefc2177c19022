//! Liveness and dependency health.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// How long the identity provider probe may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// `GET /` - liveness greeting.
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Nimbus API is running" }))
}

/// `GET /health` - report dependency status.
///
/// Probes the identity provider's JWKS endpoint; any failure flips the
/// overall status to `unhealthy` with a 503.
pub async fn health(State(state): State<AppState>) -> Response {
    let mut dependencies: BTreeMap<&str, String> = BTreeMap::new();
    let mut healthy = true;

    let jwks_url = state.config.jwks_url();
    match state
        .http
        .get(&jwks_url)
        .timeout(PROBE_TIMEOUT)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            dependencies.insert("identity_provider", "ok".into());
            dependencies.insert("jwks", "ok".into());
        }
        Ok(response) => {
            dependencies.insert("identity_provider", format!("error: {}", response.status()));
            dependencies.insert("jwks", "error".into());
            healthy = false;
        }
        Err(e) => {
            tracing::warn!(error = %e, url = %jwks_url, "Identity provider health probe failed");
            dependencies.insert("identity_provider", format!("error: {e}"));
            dependencies.insert("jwks", "error".into());
            healthy = false;
        }
    }

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "dependencies": dependencies,
    });
    (status, Json(body)).into_response()
}

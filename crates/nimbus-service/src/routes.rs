//! Router configuration.

use std::time::Duration;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{require_auth, request_context};
use crate::handlers::{chat, conversations, health, jobs};
use crate::state::AppState;

/// Create the service router.
///
/// # Routes
///
/// ## Public
/// - `GET /` - liveness greeting
/// - `GET /health` - dependency status
///
/// ## Chat (authenticated)
/// - `POST /chat` - streaming chat (SSE; exempt from the request timeout)
/// - `GET/POST /chat/conversations`, `GET/PATCH/DELETE /chat/conversations/:id`
/// - `DELETE /chat/messages/:id`
/// - `GET /chat/models`
///
/// ## Jobs (authenticated)
/// - `POST/GET /jobs`, `GET /jobs/history`, `GET/DELETE /jobs/:id`
/// - `POST /jobs/:id/pause`, `POST /jobs/:id/resume`
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = Duration::from_secs(state.config.request_timeout_seconds);

    let api_routes = Router::new()
        .route(
            "/chat/conversations",
            get(conversations::list).post(conversations::create),
        )
        .route(
            "/chat/conversations/:id",
            get(conversations::get)
                .patch(conversations::update_title)
                .delete(conversations::remove),
        )
        .route("/chat/messages/:id", delete(conversations::remove_message))
        .route("/chat/models", get(chat::list_models))
        .route("/jobs", post(jobs::create).get(jobs::list))
        .route("/jobs/history", get(jobs::history))
        .route("/jobs/:id", get(jobs::get).delete(jobs::remove))
        .route("/jobs/:id/pause", post(jobs::pause))
        .route("/jobs/:id/resume", post(jobs::resume))
        .layer(TimeoutLayer::new(request_timeout));

    // The chat stream is long-lived, so it sits outside the timeout layer.
    let stream_routes = Router::new().route("/chat", post(chat::stream));

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .merge(api_routes)
        .merge(stream_routes)
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(middleware::from_fn(request_context))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

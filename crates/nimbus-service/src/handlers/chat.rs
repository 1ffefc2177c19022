//! Chat streaming and model listing routes.

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde_json::json;

use crate::auth::CurrentUser;
use crate::chat::{coordinator, ChatRequest};
use crate::error::ApiError;
use crate::state::AppState;

/// `POST /chat` - stream a chat completion over SSE.
pub async fn stream(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    coordinator::stream_chat(state, principal.user_id, request).await
}

/// `GET /chat/models` - list models available on the LLM backend.
pub async fn list_models(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let models = state.llm.list_models().await?;
    Ok(Json(json!({
        "models": models,
        "default_model": state.llm.default_model(),
    })))
}

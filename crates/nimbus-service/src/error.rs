//! API error types and the JSON error envelope.
//!
//! Lower layers surface typed errors; this module translates them once into
//! `{ "detail": ..., "request_id": ... }`. `IntoResponse` renders the detail
//! and stashes it in the response extensions; the request-id middleware then
//! rewrites the body with the request's id so every error envelope carries
//! it without each handler threading the id around.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use nimbus_core::CoreError;
use nimbus_llm::LlmError;
use nimbus_scheduler::SchedulerError;
use nimbus_store::StoreError;

use crate::auth::AuthError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or invalid credentials.
    #[error("{0}")]
    Unauthorized(String),

    /// Valid credentials but insufficient permissions.
    #[error("{0}")]
    Forbidden(String),

    /// Resource absent, or not owned by the caller.
    #[error("{0}")]
    NotFound(String),

    /// Invalid input.
    #[error("{0}")]
    BadRequest(String),

    /// Body failed schema validation.
    #[error("{0}")]
    UnprocessableEntity(String),

    /// Duplicate resource without replace semantics.
    #[error("{0}")]
    Conflict(String),

    /// An upstream dependency is unreachable.
    #[error("{0}")]
    DependencyUnavailable(String),

    /// Internal server error. The detail is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// The HTTP status this error maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The client-visible detail string.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Detail string carried through response extensions so the request-id
/// middleware can finalize the envelope.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

/// The error envelope returned to clients.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    /// Human-readable error description.
    pub detail: String,
    /// The request's id, as echoed in `X-Request-ID`.
    pub request_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.detail();
        let mut response = (
            status,
            Json(serde_json::json!({ "detail": detail.clone() })),
        )
            .into_response();
        response.extensions_mut().insert(ErrorDetail(detail));
        response
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::Conflict { entity, id } => {
                Self::Conflict(format!("{entity} already exists: {id}"))
            }
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NotFound(id) => Self::NotFound(format!("Job not found: {id}")),
            SchedulerError::Conflict(id) => Self::Conflict(format!("Job already exists: {id}")),
            SchedulerError::UnknownFunction(name) => {
                Self::BadRequest(format!("Unknown job function: {name}"))
            }
            SchedulerError::Core(e) => Self::BadRequest(e.to_string()),
            SchedulerError::Persistence { .. } | SchedulerError::NotRunning => {
                Self::Internal(err.to_string())
            }
            SchedulerError::Store(e) => Self::from(e),
        }
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Api { status: 404, message } => {
                Self::NotFound(format!("Model not found: {message}"))
            }
            other => Self::DependencyUnavailable(format!("LLM backend unavailable: {other}")),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InsufficientPermissions => Self::Forbidden(err.to_string()),
            AuthError::Fetch(_) => Self::DependencyUnavailable(err.to_string()),
            other => Self::Unauthorized(other.to_string()),
        }
    }
}

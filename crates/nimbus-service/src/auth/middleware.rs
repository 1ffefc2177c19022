//! Request-id propagation and the authentication gate.

use axum::extract::{Request, State};
use axum::http::header::{HeaderValue, AUTHORIZATION};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use nimbus_core::Principal;

use super::AuthError;
use crate::error::{ApiError, ErrorDetail, ErrorEnvelope};
use crate::state::AppState;

/// Header carrying the per-request id on every response.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Detail returned when a protected route is hit with no credentials.
pub const AUTH_HEADER_MISSING: &str = "Authorization header missing";

/// The request's id, available from request extensions.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Outermost middleware: issue a fresh UUID per request, expose it to
/// handlers, stamp it on the response, and finalize any error envelope with
/// it.
pub async fn request_context(mut request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    request.extensions_mut().insert(RequestId(request_id));

    let mut response = next.run(request).await;

    if let Some(ErrorDetail(detail)) = response.extensions().get::<ErrorDetail>().cloned() {
        response = envelope_response(response.status(), detail, request_id);
    } else if response.status().is_client_error() || response.status().is_server_error() {
        // Errors produced outside ApiError (body rejections, 405s, layer
        // timeouts) still leave with the standard envelope.
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap_or_default();
        let detail = String::from_utf8_lossy(&bytes).trim().to_string();
        let detail = if detail.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            detail
        };
        response = envelope_response(status, detail, request_id);
    }

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

fn envelope_response(
    status: axum::http::StatusCode,
    detail: String,
    request_id: Uuid,
) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            detail,
            request_id: request_id.to_string(),
        }),
    )
        .into_response()
}

/// Authentication gate for every non-public request.
///
/// CORS preflights and public paths pass untouched. Otherwise the `X-API-Key`
/// header is verified first, then `Authorization: Bearer`; at least one must
/// succeed, and the API-key identity wins when both are present. The
/// resulting [`Principal`] rides the request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if method == Method::OPTIONS || state.config.public_paths.contains(&path) {
        return next.run(request).await;
    }

    tracing::debug!(method = %method, path = %path, "Authenticating request");

    let api_key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);

    let mut api_key_principal: Option<Principal> = None;
    if let Some(key) = api_key {
        match state.authenticator.verify_api_key(&key, None).await {
            Ok(data) => api_key_principal = Some(Principal::from_api_key(&data)),
            Err(e) => {
                tracing::warn!(method = %method, path = %path, error = %e, "API key rejected");
                return ApiError::from(e).into_response();
            }
        }
    }

    let mut jwt_principal: Option<Principal> = None;
    if let Some(authorization) = authorization {
        let Some(token) = authorization.strip_prefix("Bearer ") else {
            tracing::warn!(method = %method, path = %path, "Invalid authorization scheme");
            return ApiError::Unauthorized(
                "Invalid authorization scheme. Expected 'Bearer'".into(),
            )
            .into_response();
        };
        let token = token.trim();
        if token.is_empty() {
            return ApiError::Unauthorized("Token missing".into()).into_response();
        }
        match state.authenticator.verify_jwt(token).await {
            Ok(claims) => match Principal::from_jwt_claims(claims) {
                Some(principal) => jwt_principal = Some(principal),
                None => {
                    return ApiError::from(AuthError::InvalidToken(
                        "token carries no subject".into(),
                    ))
                    .into_response();
                }
            },
            Err(e) => {
                tracing::warn!(method = %method, path = %path, error = %e, "JWT rejected");
                return ApiError::from(e).into_response();
            }
        }
    }

    let Some(principal) = api_key_principal.or(jwt_principal) else {
        tracing::warn!(method = %method, path = %path, "No credentials presented");
        return ApiError::Unauthorized(AUTH_HEADER_MISSING.into()).into_response();
    };

    tracing::info!(
        method = %method,
        path = %path,
        user_id = %principal.user_id,
        source = ?principal.source,
        "Request authenticated"
    );
    request.extensions_mut().insert(principal);
    next.run(request).await
}

/// Extractor for the authenticated principal.
pub struct CurrentUser(pub Principal);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| ApiError::Unauthorized(AUTH_HEADER_MISSING.into()))
    }
}

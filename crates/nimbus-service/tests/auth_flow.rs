//! Authentication middleware integration tests.
//!
//! These run against mock identity provider and LLM backends; the database
//! pool stays lazy, so no PostgreSQL is needed.

mod support;

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use support::{jwk, make_key, mount_jwks, sign_token, TestHarness, DEFAULT_KID};

async fn mount_models(harness: &TestHarness) {
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3:8b"}]
        })))
        .mount(&harness.llm)
        .await;
}

// ============================================================================
// Envelope and public paths
// ============================================================================

#[tokio::test]
async fn protected_route_without_credentials_is_401_with_envelope() {
    let harness = TestHarness::new().await;

    let response = harness.server.get("/chat/conversations").await;
    response.assert_status_unauthorized();

    let header = response.header("x-request-id");
    let body: serde_json::Value = response.json();
    assert_eq!(body["detail"], "Authorization header missing");
    let request_id = body["request_id"].as_str().expect("request_id in body");
    assert_eq!(request_id, header.to_str().unwrap());
}

#[tokio::test]
async fn every_protected_route_rejects_missing_credentials() {
    let harness = TestHarness::new().await;
    for (verb, route) in [
        ("GET", "/chat/conversations"),
        ("POST", "/chat/conversations"),
        ("GET", "/chat/models"),
        ("POST", "/chat"),
        ("GET", "/jobs"),
        ("POST", "/jobs"),
        ("GET", "/jobs/history"),
    ] {
        let response = match verb {
            "GET" => harness.server.get(route).await,
            _ => harness.server.post(route).json(&json!({})).await,
        };
        assert_eq!(
            response.status_code(),
            401,
            "{verb} {route} should be gated"
        );
        let body: serde_json::Value = response.json();
        assert!(body["detail"].is_string(), "{verb} {route} envelope");
        assert!(body["request_id"].is_string(), "{verb} {route} envelope");
    }
}

#[tokio::test]
async fn public_paths_pass_without_credentials() {
    let harness = TestHarness::new().await;

    let response = harness.server.get("/").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["message"].as_str().unwrap().contains("running"));

    // The JWKS mock doubles as the identity provider health probe target.
    let response = harness.server.get("/health").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"]["jwks"], "ok");
}

#[tokio::test]
async fn health_reports_unhealthy_when_identity_provider_is_down() {
    let harness = TestHarness::without_jwks().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/jwks"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&harness.identity)
        .await;

    let response = harness.server.get("/health").await;
    assert_eq!(response.status_code(), 503);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "unhealthy");
}

// ============================================================================
// JWT flow
// ============================================================================

#[tokio::test]
async fn valid_jwt_reaches_the_handler() {
    let harness = TestHarness::new().await;
    mount_models(&harness).await;

    let response = harness
        .server
        .get("/chat/models")
        .add_header("authorization", harness.bearer("user-1"))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["models"][0]["name"], "llama3:8b");
}

#[tokio::test]
async fn non_bearer_scheme_is_rejected() {
    let harness = TestHarness::new().await;

    let response = harness
        .server
        .get("/chat/models")
        .add_header("authorization", "Basic dXNlcjpwYXNz")
        .await;
    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("Invalid authorization scheme"));
}

#[tokio::test]
async fn token_without_kid_is_rejected() {
    let harness = TestHarness::new().await;

    // Compact JWT with no kid in the header.
    let claims = harness.claims("user-1");
    let header = json!({ "alg": "EdDSA", "typ": "JWT" });
    let input = format!(
        "{}.{}",
        nimbus_service::auth::jwks::base64url_encode(header.to_string().as_bytes()),
        nimbus_service::auth::jwks::base64url_encode(claims.to_string().as_bytes()),
    );
    use ed25519_dalek::Signer;
    let signature = harness.signing_key.sign(input.as_bytes());
    let token = format!(
        "{input}.{}",
        nimbus_service::auth::jwks::base64url_encode(&signature.to_bytes())
    );

    let response = harness
        .server
        .get("/chat/models")
        .add_header("authorization", format!("Bearer {token}"))
        .await;
    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert!(body["detail"].as_str().unwrap().contains("kid"));
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let harness = TestHarness::new().await;

    let now = Utc::now().timestamp();
    let claims = json!({
        "sub": "user-1",
        "iss": harness.identity.uri(),
        "aud": harness.identity.uri(),
        "iat": now - 7200,
        "exp": now - 3600,
    });
    let token = sign_token(&harness.signing_key, DEFAULT_KID, &claims);

    let response = harness
        .server
        .get("/chat/models")
        .add_header("authorization", format!("Bearer {token}"))
        .await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn wrong_issuer_is_rejected() {
    let harness = TestHarness::new().await;

    let now = Utc::now().timestamp();
    let claims = json!({
        "sub": "user-1",
        "iss": "https://evil.example.com",
        "aud": harness.identity.uri(),
        "iat": now,
        "exp": now + 3600,
    });
    let token = sign_token(&harness.signing_key, DEFAULT_KID, &claims);

    let response = harness
        .server
        .get("/chat/models")
        .add_header("authorization", format!("Bearer {token}"))
        .await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn token_signed_by_unknown_key_is_rejected_after_one_refresh() {
    let harness = TestHarness::new().await;
    mount_models(&harness).await;

    // Warm the cache with the published key.
    let warm = harness
        .server
        .get("/chat/models")
        .add_header("authorization", harness.bearer("user-1"))
        .await;
    warm.assert_status_ok();
    let fetches_after_warm = harness.jwks_fetch_count().await;

    // A token from a key the provider never published: the verifier forces
    // exactly one refresh, still cannot find the kid, and rejects.
    let rogue = make_key(99);
    let token = sign_token(&rogue, "rogue-kid", &harness.claims("user-1"));
    let response = harness
        .server
        .get("/chat/models")
        .add_header("authorization", format!("Bearer {token}"))
        .await;
    response.assert_status_unauthorized();
    assert_eq!(harness.jwks_fetch_count().await, fetches_after_warm + 1);
}

#[tokio::test]
async fn key_rotation_refreshes_once_then_serves_from_cache() {
    let harness = TestHarness::new().await;
    mount_models(&harness).await;

    // Warm the cache with K1.
    harness
        .server
        .get("/chat/models")
        .add_header("authorization", harness.bearer("user-1"))
        .await
        .assert_status_ok();

    // Rotate: the provider now also publishes K2.
    let key2 = make_key(42);
    harness.identity.reset().await;
    mount_jwks(
        &harness.identity,
        &[jwk(&harness.signing_key, DEFAULT_KID), jwk(&key2, "test-key-2")],
    )
    .await;
    let token = sign_token(&key2, "test-key-2", &harness.claims("user-2"));

    // First K2 request forces exactly one refresh.
    harness
        .server
        .get("/chat/models")
        .add_header("authorization", format!("Bearer {token}"))
        .await
        .assert_status_ok();
    assert_eq!(harness.jwks_fetch_count().await, 1);

    // Second K2 request hits the cache: no further fetch.
    harness
        .server
        .get("/chat/models")
        .add_header("authorization", format!("Bearer {token}"))
        .await
        .assert_status_ok();
    assert_eq!(harness.jwks_fetch_count().await, 1);
}

#[tokio::test]
async fn jwks_outage_maps_to_503() {
    let harness = TestHarness::without_jwks().await;
    // No JWKS mock at all: the fetch fails with a non-success status.
    Mock::given(method("GET"))
        .and(path("/api/auth/jwks"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&harness.identity)
        .await;

    let token = sign_token(
        &harness.signing_key,
        DEFAULT_KID,
        &harness.claims("user-1"),
    );
    let response = harness
        .server
        .get("/chat/models")
        .add_header("authorization", format!("Bearer {token}"))
        .await;
    assert_eq!(response.status_code(), 503);
}

// ============================================================================
// API key flow
// ============================================================================

async fn mount_api_key_verify(harness: &TestHarness, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/api/auth/api-key/verify"))
        .and(body_partial_json(json!({ "key": "nk_live_123" })))
        .respond_with(template)
        .mount(&harness.identity)
        .await;
}

#[tokio::test]
async fn valid_api_key_reaches_the_handler() {
    let harness = TestHarness::new().await;
    mount_models(&harness).await;
    mount_api_key_verify(
        &harness,
        ResponseTemplate::new(200).set_body_json(json!({
            "valid": true,
            "key": {
                "id": "key-1",
                "userId": "user-9",
                "permissions": {"jobs": ["read"]},
                "enabled": true
            }
        })),
    )
    .await;

    let response = harness
        .server
        .get("/chat/models")
        .add_header("x-api-key", "nk_live_123")
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn rejected_api_key_is_401() {
    let harness = TestHarness::new().await;
    mount_api_key_verify(&harness, ResponseTemplate::new(401)).await;

    let response = harness
        .server
        .get("/chat/models")
        .add_header("x-api-key", "nk_live_123")
        .await;
    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["detail"], "Invalid API key");
}

#[tokio::test]
async fn underprivileged_api_key_is_403() {
    let harness = TestHarness::new().await;
    mount_api_key_verify(&harness, ResponseTemplate::new(403)).await;

    let response = harness
        .server
        .get("/chat/models")
        .add_header("x-api-key", "nk_live_123")
        .await;
    assert_eq!(response.status_code(), 403);
}

#[tokio::test]
async fn verify_response_without_user_id_is_401() {
    let harness = TestHarness::new().await;
    mount_api_key_verify(
        &harness,
        ResponseTemplate::new(200).set_body_json(json!({
            "valid": true,
            "key": { "id": "key-1", "userId": "" }
        })),
    )
    .await;

    let response = harness
        .server
        .get("/chat/models")
        .add_header("x-api-key", "nk_live_123")
        .await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn api_key_wins_when_both_credentials_present() {
    let harness = TestHarness::new().await;
    mount_models(&harness).await;
    mount_api_key_verify(
        &harness,
        ResponseTemplate::new(200).set_body_json(json!({
            "valid": true,
            "key": { "id": "key-1", "userId": "api-user" }
        })),
    )
    .await;

    let response = harness
        .server
        .get("/chat/models")
        .add_header("x-api-key", "nk_live_123")
        .add_header("authorization", harness.bearer("jwt-user"))
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn invalid_api_key_fails_even_with_valid_jwt() {
    // A presented credential that fails closes the request; the middleware
    // does not fall through to the other one.
    let harness = TestHarness::new().await;
    mount_api_key_verify(&harness, ResponseTemplate::new(401)).await;

    let response = harness
        .server
        .get("/chat/models")
        .add_header("x-api-key", "nk_live_123")
        .add_header("authorization", harness.bearer("jwt-user"))
        .await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn cors_preflight_bypasses_auth() {
    let harness = TestHarness::new().await;
    let response = harness
        .server
        .method(axum::http::Method::OPTIONS, "/jobs")
        .add_header("origin", "http://localhost:3000")
        .add_header("access-control-request-method", "POST")
        .await;
    assert!(
        response.status_code().is_success(),
        "preflight should not be gated, got {}",
        response.status_code()
    );
}

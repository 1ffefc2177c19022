//! Common test utilities for nimbus-service integration tests.

#![allow(dead_code)] // Utilities are shared across test files

use std::sync::Arc;

use axum_test::TestServer;
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nimbus_llm::LlmClient;
use nimbus_service::auth::jwks::base64url_encode;
use nimbus_service::{create_router, AppState, ServiceConfig};
use nimbus_store::PgStore;

/// The default signing key's kid.
pub const DEFAULT_KID: &str = "test-key-1";

/// Test harness: mock identity provider, mock LLM backend, and the service
/// router. The database pool is lazy, so tests that never touch storage run
/// without PostgreSQL.
pub struct TestHarness {
    pub server: TestServer,
    pub identity: MockServer,
    pub llm: MockServer,
    pub state: AppState,
    pub signing_key: SigningKey,
}

impl TestHarness {
    /// Harness with the default signing key published in the mock JWKS.
    pub async fn new() -> Self {
        let identity = MockServer::start().await;
        let signing_key = make_key(7);
        mount_jwks(&identity, &[jwk(&signing_key, DEFAULT_KID)]).await;
        Self::from_identity(identity, signing_key).await
    }

    /// Harness without any JWKS mock mounted; callers control the identity
    /// provider's behavior entirely.
    pub async fn without_jwks() -> Self {
        let identity = MockServer::start().await;
        Self::from_identity(identity, make_key(7)).await
    }

    async fn from_identity(identity: MockServer, signing_key: SigningKey) -> Self {
        let llm = MockServer::start().await;

        let config = ServiceConfig {
            identity_provider_url: identity.uri(),
            jwt_issuer: identity.uri(),
            jwt_audience: identity.uri(),
            llm_base_url: llm.uri(),
            llm_default_model: "llama3:8b".into(),
            ..ServiceConfig::default()
        };

        // Lazy pool: only established when a test actually hits storage.
        let pool = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool");
        let store = Arc::new(PgStore::from_pool(pool));

        let llm_client = Arc::new(
            LlmClient::new(config.llm_base_url.clone(), config.llm_default_model.clone())
                .expect("llm client"),
        );
        let state = AppState::new(config, store, llm_client);
        let server = TestServer::new(create_router(state.clone())).expect("test server");

        Self {
            server,
            identity,
            llm,
            state,
            signing_key,
        }
    }

    /// Harness backed by a real PostgreSQL (env `DATABASE_URL`), with
    /// migrations applied and the scheduler running.
    #[cfg(feature = "pg-tests")]
    pub async fn with_database() -> Self {
        let identity = MockServer::start().await;
        let signing_key = make_key(7);
        mount_jwks(&identity, &[jwk(&signing_key, DEFAULT_KID)]).await;
        let llm = MockServer::start().await;

        let database_url =
            std::env::var("DATABASE_URL").expect("pg-tests require DATABASE_URL to be set");
        let config = ServiceConfig {
            identity_provider_url: identity.uri(),
            jwt_issuer: identity.uri(),
            jwt_audience: identity.uri(),
            llm_base_url: llm.uri(),
            llm_default_model: "llama3:8b".into(),
            database_url: database_url.clone(),
            ..ServiceConfig::default()
        };

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .expect("connect to test database");
        let store = Arc::new(PgStore::from_pool(pool));
        store.migrate().await.expect("apply migrations");

        let llm_client = Arc::new(
            LlmClient::new(config.llm_base_url.clone(), config.llm_default_model.clone())
                .expect("llm client"),
        );
        let state = AppState::new(config, store, llm_client);
        state.scheduler.start();
        let server = TestServer::new(create_router(state.clone())).expect("test server");

        Self {
            server,
            identity,
            llm,
            state,
            signing_key,
        }
    }

    /// A valid bearer token for `sub`, signed with the default key.
    pub fn bearer(&self, sub: &str) -> String {
        let claims = self.claims(sub);
        format!(
            "Bearer {}",
            sign_token(&self.signing_key, DEFAULT_KID, &claims)
        )
    }

    /// Standard claims for `sub`, valid for an hour.
    pub fn claims(&self, sub: &str) -> Value {
        let now = Utc::now().timestamp();
        json!({
            "sub": sub,
            "iss": self.identity.uri(),
            "aud": self.identity.uri(),
            "iat": now,
            "exp": now + 3600,
        })
    }

    /// Count requests the identity provider received on its JWKS endpoint.
    pub async fn jwks_fetch_count(&self) -> usize {
        self.identity
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/api/auth/jwks")
            .count()
    }
}

/// A deterministic Ed25519 signing key.
pub fn make_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// A collision-free identifier for shared-database tests.
pub fn unique_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

/// The JWK document entry for a signing key.
pub fn jwk(key: &SigningKey, kid: &str) -> Value {
    json!({
        "kty": "OKP",
        "crv": "Ed25519",
        "kid": kid,
        "x": base64url_encode(key.verifying_key().as_bytes()),
        "alg": "EdDSA",
    })
}

/// Mount a JWKS document on the mock identity provider.
pub async fn mount_jwks(server: &MockServer, keys: &[Value]) {
    Mock::given(method("GET"))
        .and(path("/api/auth/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
        .mount(server)
        .await;
}

/// Compact-serialize and sign a JWT with the given key and kid.
pub fn sign_token(key: &SigningKey, kid: &str, claims: &Value) -> String {
    let header = json!({ "alg": "EdDSA", "typ": "JWT", "kid": kid });
    let signing_input = format!(
        "{}.{}",
        base64url_encode(header.to_string().as_bytes()),
        base64url_encode(claims.to_string().as_bytes()),
    );
    let signature = key.sign(signing_input.as_bytes());
    format!("{signing_input}.{}", base64url_encode(&signature.to_bytes()))
}

//! Credential verification: bearer JWTs and API keys.

use std::sync::Arc;

use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};

use nimbus_core::ApiKeyData;

use super::jwks::{decoding_key_for, JwksCache};
use super::AuthError;
use crate::config::ServiceConfig;

/// Verifies bearer JWTs against the JWKS cache and API keys against the
/// identity provider's verification endpoint.
pub struct Authenticator {
    jwks: Arc<JwksCache>,
    http: reqwest::Client,
    verify_url: String,
    issuer: String,
    audience: String,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    key: Option<VerifiedKey>,
}

#[derive(Debug, Deserialize)]
struct VerifiedKey {
    #[serde(default)]
    id: String,
    #[serde(rename = "userId", default)]
    user_id: String,
    #[serde(default)]
    permissions: Option<Map<String, Value>>,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Authenticator {
    /// Build an authenticator. The HTTP client carries the verification
    /// timeout.
    #[must_use]
    pub fn new(jwks: Arc<JwksCache>, http: reqwest::Client, config: &ServiceConfig) -> Self {
        Self {
            jwks,
            http,
            verify_url: config.api_key_verify_url(),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
        }
    }

    /// Verify a bearer JWT and return its claims.
    ///
    /// The unverified header supplies the `kid`; an unknown `kid` (or an
    /// expired cache) forces exactly one JWKS refresh before the lookup
    /// fails. The signature is checked as `EdDSA` with the configured issuer
    /// and audience enforced.
    ///
    /// # Errors
    ///
    /// [`AuthError::MissingKid`], [`AuthError::InvalidToken`],
    /// [`AuthError::KeyNotFound`], or [`AuthError::Fetch`].
    pub async fn verify_jwt(&self, token: &str) -> Result<Map<String, Value>, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let kid = header.kid.ok_or(AuthError::MissingKid)?;

        let force_refresh = !self.jwks.has_valid_kid(&kid).await;
        if force_refresh {
            tracing::debug!(kid = %kid, "Refreshing JWKS cache for unknown or expired kid");
        }
        let jwks = self.jwks.get(force_refresh).await?;
        let key = decoding_key_for(&jwks, &kid)?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let data = decode::<Map<String, Value>>(token, &key, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        tracing::debug!(kid = %kid, "Token verified");
        Ok(data.claims)
    }

    /// Verify an API key against the identity provider.
    ///
    /// Posts `{key, permissions?}` to the verification endpoint. A 401 maps
    /// to [`AuthError::InvalidApiKey`], a 403 to
    /// [`AuthError::InsufficientPermissions`], and transport failures to
    /// [`AuthError::Fetch`]. A successful response must carry `valid=true`
    /// and a populated `key.userId`.
    ///
    /// # Errors
    ///
    /// As described above.
    pub async fn verify_api_key(
        &self,
        key: &str,
        required_permissions: Option<&Value>,
    ) -> Result<ApiKeyData, AuthError> {
        let mut body = Map::new();
        body.insert("key".into(), Value::String(key.to_string()));
        if let Some(permissions) = required_permissions {
            body.insert("permissions".into(), permissions.clone());
        }

        let response = self
            .http
            .post(&self.verify_url)
            .json(&Value::Object(body))
            .send()
            .await
            .map_err(|e| AuthError::Fetch(e.to_string()))?;

        let status = response.status();
        match status.as_u16() {
            401 => return Err(AuthError::InvalidApiKey),
            403 => return Err(AuthError::InsufficientPermissions),
            _ if !status.is_success() => {
                return Err(AuthError::Fetch(format!(
                    "API key verification returned {status}"
                )));
            }
            _ => {}
        }

        let payload: VerifyResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Fetch(format!("invalid verification response: {e}")))?;

        if !payload.valid {
            return Err(AuthError::InvalidApiKey);
        }
        let key = payload.key.ok_or(AuthError::InvalidApiKey)?;
        if key.user_id.is_empty() {
            return Err(AuthError::InvalidApiKey);
        }

        Ok(ApiKeyData {
            user_id: key.user_id,
            key_id: key.id,
            permissions: key.permissions.unwrap_or_default(),
            metadata: key.metadata,
            name: key.name,
            prefix: key.prefix,
            enabled: key.enabled,
        })
    }
}

//! Request-scoped authenticated identity.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How the request authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthSource {
    /// A verified bearer JWT.
    Jwt,
    /// A verified API key.
    ApiKey,
}

/// The authenticated identity attached to a request for the duration of its
/// handling. Created by the auth middleware, never persisted.
#[derive(Debug, Clone)]
pub struct Principal {
    /// The unified user identifier.
    pub user_id: String,
    /// Which credential produced this principal.
    pub source: AuthSource,
    /// The verified claims (JWT payload, or a synthesized map for API keys).
    pub claims: Map<String, Value>,
}

impl Principal {
    /// Build a principal from verified JWT claims.
    ///
    /// The user id is `sub`, falling back to `id` as the identity provider's
    /// older tokens carried it there. Returns `None` when neither is
    /// present.
    #[must_use]
    pub fn from_jwt_claims(claims: Map<String, Value>) -> Option<Self> {
        let user_id = claims
            .get("sub")
            .or_else(|| claims.get("id"))
            .and_then(Value::as_str)?
            .to_string();
        Some(Self {
            user_id,
            source: AuthSource::Jwt,
            claims,
        })
    }

    /// Build a principal from verified API key data.
    #[must_use]
    pub fn from_api_key(data: &ApiKeyData) -> Self {
        let mut claims = Map::new();
        claims.insert("sub".into(), Value::String(data.user_id.clone()));
        claims.insert("key_id".into(), Value::String(data.key_id.clone()));
        Self {
            user_id: data.user_id.clone(),
            source: AuthSource::ApiKey,
            claims,
        }
    }
}

/// Verified API key details returned by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyData {
    /// The owning user.
    pub user_id: String,
    /// The key's identifier.
    pub key_id: String,
    /// Granted permissions, `{resource: [action, ...]}`.
    #[serde(default)]
    pub permissions: Map<String, Value>,
    /// Provider-defined metadata.
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Display name of the key.
    #[serde(default)]
    pub name: Option<String>,
    /// Public key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Whether the key is enabled.
    #[serde(default)]
    pub enabled: bool,
}

impl ApiKeyData {
    /// Check whether the key grants `action` on `resource`.
    #[must_use]
    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        self.permissions
            .get(resource)
            .and_then(Value::as_array)
            .is_some_and(|actions| actions.iter().any(|a| a.as_str() == Some(action)))
    }
}

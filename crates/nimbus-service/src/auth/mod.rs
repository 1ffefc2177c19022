//! Authentication: JWKS-backed Ed25519 JWT verification, API-key
//! verification against the identity provider, and the request-gating
//! middleware that unifies both into a request-scoped [`nimbus_core::Principal`].

pub mod authenticator;
pub mod jwks;
pub mod middleware;

pub use authenticator::Authenticator;
pub use jwks::JwksCache;
pub use middleware::{require_auth, request_context, CurrentUser, RequestId};

/// Authentication failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token header carries no `kid`.
    #[error("Token missing key ID (kid)")]
    MissingKid,

    /// Signature, issuer, audience, or expiry check failed.
    #[error("Invalid authentication token: {0}")]
    InvalidToken(String),

    /// No JWKS entry matches the token's `kid`.
    #[error("Key with kid '{0}' not found in JWKS")]
    KeyNotFound(String),

    /// The identity provider could not be reached.
    #[error("Failed to reach identity provider: {0}")]
    Fetch(String),

    /// The API key was rejected.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// The API key lacks a required permission.
    #[error("API key has insufficient permissions")]
    InsufficientPermissions,
}

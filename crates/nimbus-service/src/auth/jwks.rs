//! TTL-bounded JWKS cache with coalesced refresh.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use super::AuthError;

/// A JWKS document as published by the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    /// The published keys.
    pub keys: Vec<Jwk>,
}

/// A single JSON Web Key. Only OKP/Ed25519 entries are usable here; other
/// key types are carried but skipped during extraction.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (`OKP` for Ed25519).
    pub kty: String,
    /// Key id.
    #[serde(default)]
    pub kid: Option<String>,
    /// Curve name (`Ed25519`).
    #[serde(default)]
    pub crv: Option<String>,
    /// Base64url-encoded public key bytes.
    #[serde(default)]
    pub x: Option<String>,
    /// Declared algorithm, when present.
    #[serde(default)]
    pub alg: Option<String>,
}

#[derive(Default)]
struct CacheState {
    document: Option<Jwks>,
    kids: HashSet<String>,
    fetched_at: Option<Instant>,
    expires_at: Option<Instant>,
}

impl CacheState {
    fn is_valid(&self) -> bool {
        matches!((&self.document, self.expires_at), (Some(_), Some(expiry)) if Instant::now() < expiry)
    }
}

/// Process-wide cache of the identity provider's signing keys.
///
/// Valid iff unexpired; a lookup for an unknown `kid` forces exactly one
/// refresh before failing. Concurrent refreshes are coalesced: whoever wins
/// the refresh lock fetches, everyone else reuses the result.
pub struct JwksCache {
    client: reqwest::Client,
    url: String,
    ttl: Duration,
    state: RwLock<CacheState>,
    refresh_lock: Mutex<()>,
}

impl JwksCache {
    /// Build a cache over the given HTTP client (which carries the fetch
    /// timeout) and JWKS URL.
    #[must_use]
    pub fn new(client: reqwest::Client, url: String, ttl: Duration) -> Self {
        Self {
            client,
            url,
            ttl,
            state: RwLock::new(CacheState::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Whether the cache is currently valid and knows this `kid`.
    pub async fn has_valid_kid(&self, kid: &str) -> bool {
        let state = self.state.read().await;
        state.is_valid() && state.kids.contains(kid)
    }

    /// Return the JWKS document, refreshing when expired or forced.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Fetch`] when the identity provider is
    /// unreachable or returns garbage.
    pub async fn get(&self, force_refresh: bool) -> Result<Arc<Jwks>, AuthError> {
        let entered = Instant::now();
        if !force_refresh {
            let state = self.state.read().await;
            if state.is_valid() {
                if let Some(document) = &state.document {
                    return Ok(Arc::new(document.clone()));
                }
            }
        }

        let _guard = self.refresh_lock.lock().await;
        // Another task may have refreshed while this one waited for the
        // lock; a fetch newer than our entry instant counts.
        {
            let state = self.state.read().await;
            if let (Some(document), Some(fetched_at)) = (&state.document, state.fetched_at) {
                if fetched_at >= entered && state.is_valid() {
                    return Ok(Arc::new(document.clone()));
                }
            }
        }

        let document = self.fetch().await?;
        let kids: HashSet<String> = document
            .keys
            .iter()
            .filter_map(|key| key.kid.clone())
            .collect();
        let now = Instant::now();
        {
            let mut state = self.state.write().await;
            state.document = Some(document.clone());
            state.kids = kids;
            state.fetched_at = Some(now);
            state.expires_at = Some(now + self.ttl);
        }
        tracing::info!(
            keys = document.keys.len(),
            ttl_seconds = self.ttl.as_secs(),
            "JWKS cache updated"
        );
        Ok(Arc::new(document))
    }

    async fn fetch(&self) -> Result<Jwks, AuthError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AuthError::Fetch(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            tracing::error!(status = %status, url = %self.url, "JWKS fetch returned non-success");
            return Err(AuthError::Fetch(format!(
                "JWKS endpoint returned {status}"
            )));
        }
        response
            .json::<Jwks>()
            .await
            .map_err(|e| AuthError::Fetch(format!("invalid JWKS document: {e}")))
    }
}

/// Extract the Ed25519 decoding key for `kid` from a JWKS document.
///
/// Matching entries must carry `kty=OKP` and `crv=Ed25519`; the base64url
/// `x` field holds the raw 32-byte public key.
///
/// # Errors
///
/// Returns [`AuthError::KeyNotFound`] when no usable entry matches.
pub fn decoding_key_for(jwks: &Jwks, kid: &str) -> Result<DecodingKey, AuthError> {
    for key in &jwks.keys {
        if key.kid.as_deref() != Some(kid) {
            continue;
        }
        if key.kty != "OKP" || key.crv.as_deref() != Some("Ed25519") {
            tracing::debug!(kid = %kid, kty = %key.kty, "Skipping non-Ed25519 JWK");
            continue;
        }
        let Some(x) = key.x.as_deref() else {
            continue;
        };
        let public_bytes = base64url_decode(x)
            .map_err(|e| AuthError::Fetch(format!("invalid JWK x field: {e}")))?;
        if public_bytes.len() != 32 {
            return Err(AuthError::Fetch(format!(
                "Ed25519 public key must be 32 bytes, got {}",
                public_bytes.len()
            )));
        }
        return Ok(DecodingKey::from_ed_der(&ed25519_spki_der(&public_bytes)));
    }
    Err(AuthError::KeyNotFound(kid.to_string()))
}

/// Decode a base64url (unpadded) string.
///
/// # Errors
///
/// Returns the underlying decode error.
pub fn base64url_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(data.trim_end_matches('='))
}

/// Encode bytes as base64url without padding.
#[must_use]
pub fn base64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Wrap a raw Ed25519 public key in a SubjectPublicKeyInfo DER structure:
/// `SEQUENCE { SEQUENCE { OID 1.3.101.112 }, BIT STRING <key> }`.
fn ed25519_spki_der(public_key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(44);
    // Outer SEQUENCE, length 42: AlgorithmIdentifier (7) + BIT STRING (35).
    out.extend_from_slice(&[0x30, 0x2a]);
    // AlgorithmIdentifier: SEQUENCE { OID 1.3.101.112 }.
    out.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // BIT STRING: 33 bytes, zero unused bits, then the key.
    out.extend_from_slice(&[0x03, 0x21, 0x00]);
    out.extend_from_slice(public_key);
    out
}

//! Public-key handling for credential transport.
//!
//! The peer service publishes an RSA public key; passwords are encrypted
//! under it with OAEP(SHA-256) and shipped as base64, so the plaintext never
//! crosses the wire. The key itself is cached in the state store and trusted
//! for a configurable window before being refetched.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{Duration, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::sha2::Sha256;
use rsa::{Oaep, RsaPublicKey};
use serde::Deserialize;
use tracing::{debug, warn};

use cs_core::config::ClientConfig;
use cs_core::store::{StateStore, PUBLIC_KEY_SLOT};
use cs_core::types::CachedPublicKey;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A single cipher operation failed.
#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    /// The supplied key material could not be parsed as an SPKI PEM.
    #[error("malformed public key: {0}")]
    MalformedKey(String),
    /// The primitive rejected the input (e.g. plaintext exceeds the key's
    /// safe block size).
    #[error("cipher rejected input: {0}")]
    Cipher(String),
}

/// Fetching the remote public key failed.
#[derive(Debug, thiserror::Error)]
pub enum KeyFetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("key endpoint returned status {status}")]
    Endpoint { status: u16 },
    #[error("failed to parse key response: {0}")]
    Parse(String),
}

/// Credential encryption failed.
///
/// Deliberately opaque: callers cannot tell whether the key fetch or the
/// cipher operation broke. The failing stage is logged instead.
#[derive(Debug, thiserror::Error)]
#[error("credential encryption failed")]
pub struct CredentialEncryptionError;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PublicKeyResponse {
    public_key: String,
}

// ---------------------------------------------------------------------------
// Pure cipher operation
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` under a PEM-encoded RSA public key.
///
/// Returns the ciphertext as standard base64 — the transport encoding the
/// login endpoint expects.
pub fn encrypt(plaintext: &str, public_key_pem: &str) -> Result<String, EncryptionError> {
    let key = RsaPublicKey::from_public_key_pem(public_key_pem.trim())
        .map_err(|e| EncryptionError::MalformedKey(e.to_string()))?;
    let mut rng = rand::rngs::OsRng;
    let ciphertext = key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext.as_bytes())
        .map_err(|e| EncryptionError::Cipher(e.to_string()))?;
    Ok(BASE64.encode(ciphertext))
}

// ---------------------------------------------------------------------------
// CredentialEncryptor
// ---------------------------------------------------------------------------

/// Fetches, caches, and applies the service's asymmetric public key.
///
/// The cached key lives in the [`PUBLIC_KEY_SLOT`] state slot and is trusted
/// for `keys.ttl_hours`. Concurrent cache misses collapse into a single
/// in-flight fetch: whichever caller takes the gate first performs the
/// network round-trip, everyone queued behind it re-reads the fresh cache.
pub struct CredentialEncryptor {
    http: reqwest::Client,
    base_url: String,
    store: Arc<StateStore>,
    key_ttl: Duration,
    fetch_gate: tokio::sync::Mutex<()>,
}

impl CredentialEncryptor {
    pub fn new(config: &ClientConfig, store: Arc<StateStore>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.api.request_timeout_secs))
            .user_agent("coding-space/0.1")
            .build()
            .expect("failed to build http client");

        Self {
            http,
            base_url: config.api.base_url.clone(),
            store,
            key_ttl: Duration::hours(config.keys.ttl_hours),
            fetch_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Return the current public key PEM, fetching it when the cache is cold
    /// or past its trust window.
    pub async fn public_key(&self) -> Result<String, KeyFetchError> {
        if let Some(key) = self.fresh_cached() {
            return Ok(key);
        }

        let _gate = self.fetch_gate.lock().await;
        // A concurrent caller may have refilled the cache while we waited.
        if let Some(key) = self.fresh_cached() {
            return Ok(key);
        }

        let url = format!("{}/api/v1/auth/public-key", self.base_url);
        debug!(url = %url, "fetching service public key");
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(KeyFetchError::Endpoint {
                status: resp.status().as_u16(),
            });
        }
        let body: PublicKeyResponse = resp
            .json()
            .await
            .map_err(|e| KeyFetchError::Parse(e.to_string()))?;

        let cached = CachedPublicKey::fetched_now(body.public_key.clone());
        if let Err(e) = self.store.write_slot(PUBLIC_KEY_SLOT, &cached) {
            // The key is still usable for this call; only the cache is lost.
            warn!(error = %e, "could not persist fetched public key");
        }
        Ok(body.public_key)
    }

    /// Encrypt a password under the service's current public key.
    ///
    /// Any failure — key fetch, key parse, cipher — collapses into the one
    /// opaque [`CredentialEncryptionError`]; the stage is logged here.
    pub async fn encrypt_password(
        &self,
        password: &str,
    ) -> Result<String, CredentialEncryptionError> {
        let pem = self.public_key().await.map_err(|e| {
            warn!(error = %e, "public key unavailable for credential encryption");
            CredentialEncryptionError
        })?;
        encrypt(password, &pem).map_err(|e| {
            warn!(error = %e, "credential cipher operation failed");
            CredentialEncryptionError
        })
    }

    /// Drop the cached key, forcing a refetch on next use.
    ///
    /// Used by tests and as recovery after a detected key rotation.
    pub fn clear_key_cache(&self) {
        if let Err(e) = self.store.delete_slot(PUBLIC_KEY_SLOT) {
            warn!(error = %e, "could not clear cached public key");
        }
    }

    fn fresh_cached(&self) -> Option<String> {
        let cached: CachedPublicKey = self.store.read_slot(PUBLIC_KEY_SLOT)?;
        cached
            .is_fresh_at(Utc::now(), self.key_ttl)
            .then_some(cached.public_key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

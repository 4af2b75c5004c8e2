use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session record
// ---------------------------------------------------------------------------

/// Persisted proof-of-login with its expiry.
///
/// Written as one unit on successful login, deleted on logout or expiry.
/// `is_authenticated == true` implies a non-empty `access_token` and an
/// `expires_at` that was in the future at the time of the last check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub is_authenticated: bool,
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub login_time: DateTime<Utc>,
}

impl SessionRecord {
    /// Build a record for a freshly issued token, valid for `lifetime`.
    pub fn issued(access_token: String, token_type: String, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self {
            is_authenticated: true,
            access_token,
            token_type,
            expires_at: now + lifetime,
            login_time: now,
        }
    }

    /// Whether the record's expiry has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ---------------------------------------------------------------------------
// User record
// ---------------------------------------------------------------------------

/// Display-only companion to [`SessionRecord`], same lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub login_time: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            login_time: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cached public key
// ---------------------------------------------------------------------------

/// A PEM-encoded asymmetric public key with its fetch timestamp.
///
/// Trusted only while `now - fetched_at` is below the configured TTL;
/// overwritten wholesale on refetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPublicKey {
    pub public_key: String,
    pub fetched_at: DateTime<Utc>,
}

impl CachedPublicKey {
    pub fn fetched_now(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            fetched_at: Utc::now(),
        }
    }

    /// Whether the cached key is still inside its trust window at `now`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.fetched_at < ttl
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Authenticated-session lifecycle.
//!
//! Owns the session and user state slots (sole writer, apart from the HTTP
//! layer's deletion-on-401), drives the encrypted login exchange, and
//! broadcasts every state flip on the auth event bus.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use cs_core::config::ClientConfig;
use cs_core::events::AuthEventBus;
use cs_core::store::{StateStore, SESSION_SLOT, USER_SLOT};
use cs_core::types::{SessionRecord, UserRecord};

use crate::api::ApiClient;
use crate::encryption::CredentialEncryptor;

// ---------------------------------------------------------------------------
// Wire + result types
// ---------------------------------------------------------------------------

/// The token response from the login endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    encrypted_password: &'a str,
}

/// Structured result of a login attempt.
///
/// Login never surfaces raw transport errors: every failure is folded into
/// `success == false` plus a user-presentable message.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub success: bool,
    pub message: String,
    pub data: Option<TokenResponse>,
}

impl LoginOutcome {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Owns the authenticated-session lifecycle: login, logout, expiry check,
/// current-user lookup, and state-change broadcast.
pub struct SessionManager {
    store: Arc<StateStore>,
    bus: AuthEventBus,
    encryptor: CredentialEncryptor,
    api: ApiClient,
    session_ttl: Duration,
}

impl SessionManager {
    pub fn new(config: &ClientConfig, store: Arc<StateStore>, bus: AuthEventBus) -> Self {
        let encryptor = CredentialEncryptor::new(config, Arc::clone(&store));
        let api = ApiClient::new(config, Arc::clone(&store), bus.clone());
        Self {
            store,
            bus,
            encryptor,
            api,
            session_ttl: Duration::days(config.session.ttl_days),
        }
    }

    /// The underlying API client, for callers issuing their own requests.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// The credential encryptor, mainly for cache invalidation.
    pub fn encryptor(&self) -> &CredentialEncryptor {
        &self.encryptor
    }

    /// Whether a live authenticated session exists.
    ///
    /// Side-effect-free except for lazy expiry cleanup: a session found past
    /// its `expires_at` is logged out on the spot and reported as absent.
    pub fn is_authenticated(&self) -> bool {
        let Some(session) = self.store.read_slot::<SessionRecord>(SESSION_SLOT) else {
            return false;
        };
        if session.is_expired_at(Utc::now()) {
            debug!("stored session expired, clearing");
            self.logout();
            return false;
        }
        if session.access_token.is_empty() {
            return false;
        }
        session.is_authenticated
    }

    /// Exchange credentials for a session.
    ///
    /// The password is encrypted under the service's public key before it
    /// leaves the process. On success both state slots are written and one
    /// `{is_authenticated: true}` event is published; on failure nothing is
    /// stored and no event fires.
    pub async fn login(&self, username: &str, password: &str) -> LoginOutcome {
        let encrypted_password = match self.encryptor.encrypt_password(password).await {
            Ok(ciphertext) => ciphertext,
            Err(e) => {
                warn!(username, error = %e, "login aborted before submission");
                return LoginOutcome::failure("could not encrypt credentials, please try again");
            }
        };

        let request = LoginRequest {
            username,
            encrypted_password: &encrypted_password,
        };
        let resp = match self
            .api
            .post_unguarded("/api/v1/auth/login-encrypted", &request)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(username, error = %e, "login request did not complete");
                return LoginOutcome::failure(
                    "cannot reach the server, check your network connection",
                );
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let detail = ApiClient::error_detail(resp).await;
            debug!(username, status = status.as_u16(), detail = %detail, "login rejected");
            let message = match status.as_u16() {
                401 => "invalid username or password".to_string(),
                403 => "account is disabled".to_string(),
                400 => detail,
                _ => format!("login failed: {}", detail),
            };
            return LoginOutcome::failure(message);
        }

        let token: TokenResponse = match resp.json().await {
            Ok(token) => token,
            Err(e) => {
                warn!(username, error = %e, "login response did not decode");
                return LoginOutcome::failure("login failed: malformed server response");
            }
        };
        if token.access_token.is_empty() {
            return LoginOutcome::failure("login failed: no token issued");
        }

        let session = SessionRecord::issued(
            token.access_token.clone(),
            token.token_type.clone(),
            self.session_ttl,
        );
        if let Err(e) = self.store.write_slot(SESSION_SLOT, &session) {
            error!(username, error = %e, "session could not be persisted");
            return LoginOutcome::failure("login succeeded but the session could not be saved");
        }
        let user = UserRecord::new(username);
        if let Err(e) = self.store.write_slot(USER_SLOT, &user) {
            // The session itself is intact; only the display record is lost.
            warn!(username, error = %e, "user record could not be persisted");
        }

        self.bus.publish_state(true);
        info!(username, "login succeeded");
        LoginOutcome {
            success: true,
            message: "login successful".to_string(),
            data: Some(token),
        }
    }

    /// Drop the session. Safe to call when none exists.
    pub fn logout(&self) {
        for slot in [SESSION_SLOT, USER_SLOT] {
            if let Err(e) = self.store.delete_slot(slot) {
                warn!(slot, error = %e, "could not clear slot during logout");
            }
        }
        self.bus.publish_state(false);
    }

    /// Best-effort read of the logged-in user, for display.
    pub fn current_user(&self) -> Option<UserRecord> {
        self.store.read_slot(USER_SLOT)
    }

    /// Best-effort read of the raw bearer credential.
    pub fn access_token(&self) -> Option<String> {
        let session: SessionRecord = self.store.read_slot(SESSION_SLOT)?;
        if session.access_token.is_empty() {
            return None;
        }
        Some(session.access_token)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Thin intercepting layer over the service API.
//!
//! Every outgoing request picks up the bearer credential from the state
//! store when one exists. Every incoming 401 on a guarded call force-expires
//! the local session — the only path by which the server can invalidate
//! client-side state.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cs_core::config::ClientConfig;
use cs_core::events::AuthEventBus;
use cs_core::store::{StateStore, SESSION_SLOT, USER_SLOT};
use cs_core::types::SessionRecord;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never reached the server or no response arrived.
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// The server rejected the bearer credential; the local session has
    /// already been cleared by the time the caller sees this.
    #[error("unauthorized: session invalidated")]
    Unauthorized,
    /// Any other non-success status, passed through unmodified.
    #[error("server returned status {status}: {detail}")]
    Status { status: u16, detail: String },
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// Reusable client + base URL with request/response hooks.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<StateStore>,
    bus: AuthEventBus,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, store: Arc<StateStore>, bus: AuthEventBus) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.api.request_timeout_secs))
            .user_agent("coding-space/0.1")
            .build()
            .expect("failed to build http client");

        Self {
            http,
            base_url: config.api.base_url.clone(),
            store,
            bus,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET a JSON document from the service, with both hooks applied.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.send_guarded(self.http.get(self.url(path))).await?;
        Ok(resp.json().await?)
    }

    /// POST a JSON body and decode a JSON response, with both hooks applied.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let resp = self
            .send_guarded(self.http.post(self.url(path)).json(body))
            .await?;
        Ok(resp.json().await?)
    }

    /// POST without the unauthorized hook, handing the raw response to the
    /// caller.
    ///
    /// The login flow classifies statuses itself: a 401 there means bad
    /// credentials, not an expired session, and must not wipe local state.
    pub async fn post_unguarded<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.authorized(self.http.post(self.url(path)))
            .json(body)
            .send()
            .await
    }

    /// Pull a human-readable detail out of an error response, preferring the
    /// service's `{ "detail": ... }` body over the bare status line.
    pub async fn error_detail(resp: reqwest::Response) -> String {
        let status = resp.status();
        match resp.json::<ErrorBody>().await {
            Ok(ErrorBody { detail: Some(detail) }) if !detail.is_empty() => detail,
            _ => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        }
    }

    // ----- hooks -----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Outgoing hook: attach the bearer credential when a session holds one.
    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn bearer_token(&self) -> Option<String> {
        let session: SessionRecord = self.store.read_slot(SESSION_SLOT)?;
        if session.access_token.is_empty() {
            return None;
        }
        Some(session.access_token)
    }

    /// Incoming hook: a 401 force-expires the local session; other error
    /// statuses pass through to the caller.
    async fn send_guarded(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let resp = self.authorized(builder).send().await?;
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.force_logout();
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let detail = Self::error_detail(resp).await;
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail,
            });
        }
        Ok(resp)
    }

    /// The gateway's only write capability: deleting the session on a 401.
    fn force_logout(&self) {
        info!("server rejected bearer credential, expiring local session");
        for slot in [SESSION_SLOT, USER_SLOT] {
            if let Err(e) = self.store.delete_slot(slot) {
                warn!(slot, error = %e, "could not clear slot during forced logout");
            }
        }
        self.bus.publish_state(false);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn client_with_store() -> (ApiClient, Arc<StateStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::new(dir.path().to_path_buf()));
        let client = ApiClient::new(
            &ClientConfig::default(),
            Arc::clone(&store),
            AuthEventBus::new(),
        );
        (client, store, dir)
    }

    #[test]
    fn bearer_token_requires_a_session_slot() {
        let (client, _store, _dir) = client_with_store();
        assert!(client.bearer_token().is_none());
    }

    #[test]
    fn bearer_token_reads_stored_credential() {
        let (client, store, _dir) = client_with_store();
        let record = SessionRecord::issued("tok123".into(), "bearer".into(), Duration::days(7));
        store.write_slot(SESSION_SLOT, &record).unwrap();

        assert_eq!(client.bearer_token().as_deref(), Some("tok123"));
    }

    #[test]
    fn empty_stored_token_counts_as_unauthenticated() {
        let (client, store, _dir) = client_with_store();
        let record = SessionRecord::issued(String::new(), "bearer".into(), Duration::days(7));
        store.write_slot(SESSION_SLOT, &record).unwrap();

        assert!(client.bearer_token().is_none());
    }

    #[test]
    fn url_joins_base_and_path() {
        let (client, _store, _dir) = client_with_store();
        assert_eq!(
            client.url("/api/v1/auth/public-key"),
            "http://localhost:8000/api/v1/auth/public-key"
        );
    }
}

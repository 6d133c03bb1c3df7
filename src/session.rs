//! Session state: the single owner of the in-memory grant and client handle
//!
//! One `Session` value is injected into the tool server; the handle lifecycle
//! (absent, cached, invalidated) is an explicit tagged state behind an async
//! mutex, so interleaved callers can never launch two concurrent
//! authorization flows from this process.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{self, CALLBACK_PORT, ClientIdentity, ServerConfig};
use crate::errors::{AppError, AppResult};
use crate::gmail::GmailClient;
use crate::oauth;
use crate::token_store::{Grant, TokenStore};

/// Lifecycle of the cached client handle
#[derive(Debug, Default)]
enum HandleState {
    /// No usable grant in memory (unauthenticated or invalidated)
    #[default]
    Absent,
    /// Live handle bound to the current grant
    Ready(Arc<GmailClient>),
}

/// Outcome of a handle acquisition
#[derive(Debug)]
pub enum Acquired {
    /// Ready-to-use authenticated handle
    Ready(Arc<GmailClient>),
    /// No grant available; the human must complete the flow at this URL
    AuthRequired(String),
}

/// Stateful session manager
///
/// Sole owner of the in-memory grant. The token store it wraps is the sole
/// owner of the on-disk record.
pub struct Session {
    config: ServerConfig,
    store: Arc<TokenStore>,
    http: reqwest::Client,
    state: Mutex<HandleState>,
}

impl Session {
    /// Create a session over the configured token path
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(TokenStore::new(config.token_path.clone()));
        Self {
            config,
            store,
            http: reqwest::Client::new(),
            state: Mutex::new(HandleState::Absent),
        }
    }

    /// Get the authenticated handle, resolving it lazily
    ///
    /// Order of attempts: cached handle (refreshing an expired grant when a
    /// refresh token exists), stored grant from disk, and finally the
    /// interactive flow, whose URL is returned for the human. The state lock
    /// is held across the whole resolve so interleaved callers reuse one
    /// in-flight attempt.
    ///
    /// # Errors
    ///
    /// `Configuration` when no client identity resolves (the flow is never
    /// attempted in that case); `Remote` when a refresh fails transiently.
    pub async fn acquire(&self) -> AppResult<Acquired> {
        let mut state = self.state.lock().await;

        let grant = match &*state {
            HandleState::Ready(client) if !client.grant().is_expired() => {
                return Ok(Acquired::Ready(Arc::clone(client)));
            }
            HandleState::Ready(client) => Some(client.grant().clone()),
            HandleState::Absent => self.store.load().await,
        };

        if let Some(grant) = grant {
            match self.ready_grant(grant).await {
                Ok(grant) => {
                    let client = Arc::new(GmailClient::new(self.http.clone(), grant));
                    *state = HandleState::Ready(Arc::clone(&client));
                    info!("gmail client handle ready");
                    return Ok(Acquired::Ready(client));
                }
                Err(e) if is_auth_error(&e.to_string()) => {
                    warn!("stored grant no longer refreshable: {e}");
                    *state = HandleState::Absent;
                    if let Err(e) = self.store.clear().await {
                        warn!("cannot clear rejected token record: {e}");
                    }
                    // fall through to the interactive flow
                }
                Err(e) => return Err(e),
            }
        }

        let url = self.begin_flow().await?;
        Ok(Acquired::AuthRequired(url))
    }

    /// Invalidation signal from a tool dispatcher
    ///
    /// Called after a remote call fails with an authentication-class error.
    /// Clears the stored record and drops the cached handle; the caller is
    /// expected to restart the flow and report "session expired" with the
    /// fresh URL rather than the generic error.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        *state = HandleState::Absent;
        if let Err(e) = self.store.clear().await {
            warn!("cannot clear token record: {e}");
        }
        info!("session invalidated; stored grant cleared");
    }

    /// Start (or reuse) the interactive flow and return its URL
    pub async fn begin_reauth(&self) -> AppResult<String> {
        self.begin_flow().await
    }

    /// Return a live grant, refreshing it first when needed
    ///
    /// An expired grant without a refresh token is returned as-is: the remote
    /// rejects it with a 401 and the invalidation path takes over, which
    /// keeps exactly one reset-and-reauth cycle per detected failure.
    async fn ready_grant(&self, grant: Grant) -> AppResult<Grant> {
        if !grant.is_expired() || grant.refresh_token.is_none() {
            return Ok(grant);
        }

        let identity = self.require_identity()?;
        let refreshed = oauth::refresh_grant(&self.http, &identity, &grant).await?;
        if let Err(e) = self.store.save(&refreshed).await {
            warn!("cannot persist refreshed grant, continuing in memory: {e}");
        }
        info!("access token refreshed");
        Ok(refreshed)
    }

    async fn begin_flow(&self) -> AppResult<String> {
        let identity = self.require_identity()?;
        oauth::begin_flow(
            self.http.clone(),
            identity,
            Arc::clone(&self.store),
            CALLBACK_PORT,
        )
        .await
    }

    fn require_identity(&self) -> AppResult<ClientIdentity> {
        config::resolve_identity(&self.config.credentials_path).ok_or_else(|| {
            AppError::Configuration(
                "No credentials found. Provide GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET in the environment or a credentials.json file.".to_owned(),
            )
        })
    }
}

/// Classify a remote error message
///
/// Authentication-class iff the message contains a 401 indicator, OR an
/// invalid_grant indicator, OR both a 403 indicator and an insufficient
/// permissions indicator. Anything else is a plain tool failure and must not
/// reset the token state.
pub fn is_auth_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("401")
        || msg.contains("invalid_grant")
        || (msg.contains("403") && msg.contains("insufficient permissions"))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{Acquired, Session, is_auth_error};
    use crate::config::ServerConfig;
    use crate::token_store::{Grant, TokenStore};

    #[test]
    fn classifies_unauthorized_and_invalid_grant() {
        assert!(is_auth_error("401 Unauthorized"));
        assert!(is_auth_error("Failed to list messages: 401 Unauthorized: expired"));
        assert!(is_auth_error("token endpoint said invalid_grant"));
        assert!(is_auth_error("Error 403: insufficient permissions detected"));
    }

    #[test]
    fn other_failures_are_not_authentication_class() {
        assert!(!is_auth_error("403 forbidden: quota exceeded"));
        assert!(!is_auth_error("500 Internal Server Error"));
        assert!(!is_auth_error("request failed: connection reset"));
    }

    fn test_config(token_path: PathBuf) -> ServerConfig {
        ServerConfig {
            credentials_path: PathBuf::from("/nonexistent/credentials.json"),
            token_path,
            log_file: None,
        }
    }

    #[tokio::test]
    async fn invalidation_drops_handle_and_record() {
        let token_path = std::env::temp_dir().join(format!(
            ".tokens-session-{}.json",
            uuid::Uuid::new_v4()
        ));
        let store = TokenStore::new(token_path.clone());
        store
            .save(&Grant {
                access_token: "ya29.live".to_owned(),
                refresh_token: None,
                expiry_date: None,
                scope: None,
                token_type: Some("Bearer".to_owned()),
            })
            .await
            .expect("seed grant saved");

        let session = Session::new(test_config(token_path.clone()));
        match session.acquire().await.expect("acquire succeeds") {
            Acquired::Ready(client) => assert_eq!(client.grant().access_token, "ya29.live"),
            other => panic!("expected ready handle, got {other:?}"),
        }

        // Simulated 401 from a tool call leads the dispatcher here.
        session.invalidate().await;

        assert!(!token_path.exists(), "record must be gone after invalidation");
        assert_eq!(store.load().await, None);
        assert!(
            !matches!(session.acquire().await, Ok(Acquired::Ready(_))),
            "handle must be absent after invalidation"
        );
    }
}

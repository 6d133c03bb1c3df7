//! Interactive authorization flow and token endpoint calls
//!
//! Runs the loopback redirect flow: builds the authorization URL, stands up a
//! temporary callback listener on the fixed port, exchanges the returned code
//! for a grant, and hands the grant to the token store. The URL is returned
//! to the caller immediately; the listener waits for the human independently.
//!
//! Flow states per invocation:
//! `IDLE -> LISTENING -> (AWAITING_CODE) -> EXCHANGING -> DONE | FAILED`.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::routing::get;
use chrono::Utc;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tracing::{error, info, warn};

use crate::config::ClientIdentity;
use crate::errors::{AppError, AppResult};
use crate::token_store::{Grant, TokenStore};

/// Permission scopes requested on every flow
///
/// The minimal superset needed by all tools: read, send, compose, modify.
pub const SCOPES: [&str; 4] = [
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.compose",
    "https://www.googleapis.com/auth/gmail.modify",
];

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// How long the callback listener waits for the browser redirect
///
/// After this the listener closes and the flow must be restarted by invoking
/// a tool again.
const FLOW_TIMEOUT: Duration = Duration::from_secs(600);

/// Build the authorization URL for an identity
///
/// Requests offline access so a refresh token is granted alongside the
/// short-lived access token.
pub fn authorization_url(identity: &ClientIdentity) -> String {
    format!(
        "{AUTH_ENDPOINT}?response_type=code&access_type=offline&client_id={}&redirect_uri={}&scope={}",
        urlencoding::encode(&identity.client_id),
        urlencoding::encode(&identity.redirect_uri),
        urlencoding::encode(&SCOPES.join(" ")),
    )
}

/// Shared state for one flow's callback listener
struct FlowContext {
    http: reqwest::Client,
    identity: ClientIdentity,
    store: Arc<TokenStore>,
    /// Fired once to close the listener after the first callback
    done: Mutex<Option<oneshot::Sender<()>>>,
}

/// Start the authorization flow and return the URL to present to the human
///
/// Binds the callback listener and returns without blocking on the browser.
/// A port already in use is not fatal: it is assumed to be this system's own
/// listener from an earlier call (same or concurrent process), and the URL is
/// produced anyway so the human reuses the existing listener.
///
/// The spawned listener accepts exactly one callback, exchanges the code,
/// saves the grant through the store, and closes on every exit path (success,
/// exchange failure, malformed callback, timeout).
pub async fn begin_flow(
    http: reqwest::Client,
    identity: ClientIdentity,
    store: Arc<TokenStore>,
    port: u16,
) -> AppResult<String> {
    let url = authorization_url(&identity);

    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            warn!("port {port} already in use; assuming the auth listener is already running");
            return Ok(url);
        }
        Err(e) => {
            return Err(AppError::Internal(format!("cannot bind auth listener: {e}")));
        }
    };
    info!("auth listener on port {port}");

    let (done_tx, done_rx) = oneshot::channel();
    let ctx = Arc::new(FlowContext {
        http,
        identity,
        store,
        done: Mutex::new(Some(done_tx)),
    });
    let app = Router::new()
        .route("/oauth2callback", get(oauth_callback))
        .with_state(ctx);

    tokio::spawn(async move {
        let shutdown = async move {
            tokio::select! {
                _ = done_rx => {}
                _ = tokio::time::sleep(FLOW_TIMEOUT) => {
                    warn!("authorization flow timed out awaiting callback; closing listener");
                }
            }
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("auth listener failed: {e}");
        }
    });

    Ok(url)
}

/// Handle the single browser redirect
///
/// Exchanges the authorization code and persists the grant. Whatever the
/// outcome, the shutdown signal fires so the listener never leaks the port.
async fn oauth_callback(
    State(ctx): State<Arc<FlowContext>>,
    Query(params): Query<HashMap<String, String>>,
) -> &'static str {
    let reply = match params.get("code") {
        None => "No code provided.",
        Some(code) => match exchange_code(&ctx.http, &ctx.identity, code).await {
            Ok(grant) => match ctx.store.save(&grant).await {
                Ok(()) => {
                    info!("authentication successful and tokens saved");
                    "Authentication successful! You can close this tab and return to Claude."
                }
                Err(e) => {
                    error!("cannot persist exchanged grant: {e}");
                    "Authentication failed."
                }
            },
            Err(e) => {
                error!("error retrieving access token: {e}");
                "Authentication failed."
            }
        },
    };

    if let Some(tx) = ctx.done.lock().await.take() {
        let _ = tx.send(());
    }
    reply
}

/// Token endpoint response shape
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Access token lifetime in seconds
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    /// Convert to a grant, keeping a prior refresh token when the endpoint
    /// omits one (refresh responses usually do)
    fn into_grant(self, prior_refresh: Option<String>) -> Grant {
        Grant {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(prior_refresh),
            expiry_date: self
                .expires_in
                .map(|secs| Utc::now().timestamp_millis() + secs * 1000),
            scope: self.scope,
            token_type: self.token_type,
        }
    }
}

/// Exchange an authorization code for a grant
async fn exchange_code(
    http: &reqwest::Client,
    identity: &ClientIdentity,
    code: &str,
) -> AppResult<Grant> {
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", identity.client_id.as_str()),
        ("client_secret", identity.client_secret.expose_secret()),
        ("redirect_uri", identity.redirect_uri.as_str()),
    ];
    Ok(token_request(http, &form).await?.into_grant(None))
}

/// Mint a fresh access token from a refresh token
///
/// An `invalid_grant` body surfaces in the error message, which the session
/// layer classifies as authentication-class.
pub async fn refresh_grant(
    http: &reqwest::Client,
    identity: &ClientIdentity,
    grant: &Grant,
) -> AppResult<Grant> {
    let refresh = grant
        .refresh_token
        .clone()
        .ok_or_else(|| AppError::Remote("invalid_grant: no refresh token available".to_owned()))?;
    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh.as_str()),
        ("client_id", identity.client_id.as_str()),
        ("client_secret", identity.client_secret.expose_secret()),
    ];
    Ok(token_request(http, &form).await?.into_grant(Some(refresh)))
}

/// POST a form to the token endpoint and parse the response
async fn token_request(
    http: &reqwest::Client,
    form: &[(&str, &str)],
) -> AppResult<TokenResponse> {
    let response = http
        .post(TOKEN_ENDPOINT)
        .form(form)
        .send()
        .await
        .map_err(|e| AppError::Remote(format!("token request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AppError::Remote(format!("cannot read token response: {e}")))?;
    if !status.is_success() {
        return Err(AppError::Remote(format!("{status}: {}", body.trim())));
    }
    serde_json::from_str(&body)
        .map_err(|e| AppError::Remote(format!("unparseable token response: {e}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use secrecy::SecretString;

    use super::{SCOPES, authorization_url, begin_flow};
    use crate::config::ClientIdentity;
    use crate::token_store::TokenStore;

    fn test_identity() -> ClientIdentity {
        ClientIdentity {
            client_id: "test-client".to_owned(),
            client_secret: SecretString::new("test-secret".into()),
            redirect_uri: "http://localhost:3456/oauth2callback".to_owned(),
        }
    }

    fn temp_store() -> Arc<TokenStore> {
        Arc::new(TokenStore::new(std::env::temp_dir().join(format!(
            ".tokens-flow-{}.json",
            uuid::Uuid::new_v4()
        ))))
    }

    #[test]
    fn url_requests_offline_access_and_all_scopes() {
        let url = authorization_url(&test_identity());
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("response_type=code"));
        for scope in SCOPES {
            let tail = scope.rsplit('/').next().unwrap();
            assert!(url.contains(tail), "missing scope {scope}");
        }
    }

    #[tokio::test]
    async fn flow_started_twice_tolerates_port_in_use() {
        let http = reqwest::Client::new();
        let store = temp_store();

        let first = begin_flow(http.clone(), test_identity(), Arc::clone(&store), 36456)
            .await
            .expect("first flow start succeeds");
        let second = begin_flow(http, test_identity(), store, 36456)
            .await
            .expect("second flow start reuses the bound port");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn callback_without_code_reports_and_closes() {
        let http = reqwest::Client::new();
        begin_flow(http.clone(), test_identity(), temp_store(), 36457)
            .await
            .expect("flow start succeeds");

        let body = http
            .get("http://127.0.0.1:36457/oauth2callback")
            .send()
            .await
            .expect("callback reachable")
            .text()
            .await
            .unwrap();
        assert_eq!(body, "No code provided.");
    }
}

//! Configuration for the OAuth client identity and server settings
//!
//! The client identity is resolved once per process, checking environment
//! variables first and falling back to a local `credentials.json`. Paths for
//! the token record, credentials file, and log file follow the pattern
//! `GMAIL_MCP_<KEY>` with working-directory-relative defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;

/// Fixed port the loopback OAuth callback listener binds to
pub const CALLBACK_PORT: u16 = 3456;

/// Default redirect URI pointing at the loopback callback listener
pub fn default_redirect_uri() -> String {
    format!("http://localhost:{CALLBACK_PORT}/oauth2callback")
}

/// OAuth client application identity
///
/// Immutable for the process lifetime. The client secret is stored using
/// `SecretString` to prevent accidental logging.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    /// OAuth client ID issued by the provider console
    pub client_id: String,
    /// OAuth client secret, stored in a type that prevents accidental logging
    pub client_secret: SecretString,
    /// Redirect URI the authorization server sends the browser back to
    pub redirect_uri: String,
}

/// Server-wide configuration
///
/// Wraps all file paths the server touches. Cloned into the session via `Arc`
/// for shared access.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the `credentials.json` identity file (fallback identity source)
    pub credentials_path: PathBuf,
    /// Path to the encrypted token record
    pub token_path: PathBuf,
    /// Append-only log file; `None` disables the file sink
    pub log_file: Option<PathBuf>,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// # Example Environment
    ///
    /// ```text
    /// GMAIL_MCP_CREDENTIALS_PATH=credentials.json
    /// GMAIL_MCP_TOKEN_PATH=.saved_tokens.json
    /// GMAIL_MCP_LOG_FILE=server.log
    /// ```
    pub fn load_from_env() -> Self {
        Self {
            credentials_path: path_env("GMAIL_MCP_CREDENTIALS_PATH", "credentials.json"),
            token_path: path_env("GMAIL_MCP_TOKEN_PATH", ".saved_tokens.json"),
            log_file: optional_path_env("GMAIL_MCP_LOG_FILE", "server.log"),
        }
    }
}

/// Resolve the OAuth client identity
///
/// Checks `GOOGLE_CLIENT_ID`/`GOOGLE_CLIENT_SECRET` first (both must be
/// non-empty); falls back to reading the credentials file. Returns `None`
/// when neither source yields a complete identity — callers surface that as
/// a configuration error and must not attempt the authorization flow.
pub fn resolve_identity(credentials_path: &Path) -> Option<ClientIdentity> {
    if let (Some(id), Some(secret)) = (
        non_empty_env("GOOGLE_CLIENT_ID"),
        non_empty_env("GOOGLE_CLIENT_SECRET"),
    ) {
        return Some(ClientIdentity {
            client_id: id,
            client_secret: SecretString::new(secret.into()),
            redirect_uri: default_redirect_uri(),
        });
    }

    let content = fs::read_to_string(credentials_path).ok()?;
    identity_from_key_file(&content)
}

/// Shape of a provider console key file (`credentials.json`)
///
/// Desktop clients carry an `installed` section; server clients carry `web`.
#[derive(Debug, Deserialize)]
struct KeyFile {
    installed: Option<KeySection>,
    web: Option<KeySection>,
}

#[derive(Debug, Deserialize)]
struct KeySection {
    client_id: String,
    client_secret: String,
    redirect_uris: Option<Vec<String>>,
}

/// Parse a key file body into a client identity
///
/// Prefers the `installed` section over `web`. The redirect URI defaults to
/// the loopback callback when the file lists none.
fn identity_from_key_file(content: &str) -> Option<ClientIdentity> {
    let keys: KeyFile = serde_json::from_str(content).ok()?;
    let section = keys.installed.or(keys.web)?;
    if section.client_id.trim().is_empty() || section.client_secret.trim().is_empty() {
        return None;
    }

    let redirect_uri = section
        .redirect_uris
        .and_then(|uris| uris.into_iter().next())
        .unwrap_or_else(default_redirect_uri);

    Some(ClientIdentity {
        client_id: section.client_id,
        client_secret: SecretString::new(section.client_secret.into()),
        redirect_uri,
    })
}

/// Read an environment variable, treating blank values as unset
fn non_empty_env(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Read a path environment variable with a default fallback
fn path_env(key: &str, default: &str) -> PathBuf {
    non_empty_env(key).map_or_else(|| PathBuf::from(default), PathBuf::from)
}

/// Read an optional path environment variable
///
/// Unset falls back to `default`; an explicitly empty value disables the path
/// entirely (returns `None`).
fn optional_path_env(key: &str, default: &str) -> Option<PathBuf> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => None,
        Ok(v) => Some(PathBuf::from(v)),
        Err(_) => Some(PathBuf::from(default)),
    }
}

#[cfg(test)]
mod tests {
    use super::{default_redirect_uri, identity_from_key_file};

    #[test]
    fn parses_installed_section_with_explicit_redirect() {
        let identity = identity_from_key_file(
            r#"{"installed":{"client_id":"id-1","client_secret":"s3cret","redirect_uris":["http://localhost:9999/cb"]}}"#,
        )
        .expect("identity must resolve");
        assert_eq!(identity.client_id, "id-1");
        assert_eq!(identity.redirect_uri, "http://localhost:9999/cb");
    }

    #[test]
    fn falls_back_to_web_section_and_default_redirect() {
        let identity = identity_from_key_file(
            r#"{"web":{"client_id":"id-2","client_secret":"s3cret"}}"#,
        )
        .expect("identity must resolve");
        assert_eq!(identity.client_id, "id-2");
        assert_eq!(identity.redirect_uri, default_redirect_uri());
        assert!(identity.redirect_uri.contains("3456/oauth2callback"));
    }

    #[test]
    fn rejects_incomplete_sections() {
        assert!(identity_from_key_file(r#"{"installed":{"client_id":"","client_secret":"x"}}"#).is_none());
        assert!(identity_from_key_file(r#"{"other":{}}"#).is_none());
        assert!(identity_from_key_file("not json").is_none());
    }
}

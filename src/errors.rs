//! Application error model with MCP error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to the appropriate MCP `ErrorData` type for protocol
//! compliance.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Covers all error cases the Gmail MCP server may encounter. Each variant maps
/// to an appropriate MCP error code in [`ErrorData`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, malformed request)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// No OAuth client identity could be resolved from env or credentials file
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Stored record failed authenticated decryption (tampered or wrong key)
    #[error("integrity check failed: {0}")]
    Integrity(String),
    /// Disk I/O failure while persisting the grant
    #[error("persistence failure: {0}")]
    Persistence(String),
    /// No grant is available; the human must complete the flow at this URL
    #[error("authentication required; visit {0}")]
    AuthRequired(String),
    /// The grant was invalidated remotely; a fresh flow URL is attached
    #[error("session expired; visit {0}")]
    SessionExpired(String),
    /// Remote API call failed for a non-authentication reason
    #[error("{0}")]
    Remote(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Convert to MCP `ErrorData`
    ///
    /// Maps each `AppError` variant to the appropriate MCP error type and
    /// includes a structured `code` field for client error handling.
    ///
    /// The two authentication variants carry the flow URL and render the full
    /// human-facing instructions, so every auth failure a user sees includes a
    /// literal clickable URL and a retry hint.
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            Self::InvalidInput(msg) => {
                ErrorData::invalid_params(msg.clone(), Some(json!({ "code": "invalid_input" })))
            }
            Self::Configuration(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(json!({ "code": "configuration" })))
            }
            Self::Integrity(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "integrity" })))
            }
            Self::Persistence(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "persistence" })))
            }
            Self::AuthRequired(url) => ErrorData::invalid_request(
                format!(
                    "Authentication required.\n\nPlease authenticate by visiting this URL:\n{url}\n\nAfter you log in, try your request again."
                ),
                Some(json!({ "code": "auth_required" })),
            ),
            Self::SessionExpired(url) => ErrorData::invalid_request(
                format!(
                    "Your session has expired.\n\nPlease re-authenticate by visiting this URL:\n{url}\n\nAfter you log in, try your request again."
                ),
                Some(json!({ "code": "session_expired" })),
            ),
            Self::Remote(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "remote" })))
            }
            Self::Internal(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "internal" })))
            }
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn auth_required_message_carries_url_and_retry_hint() {
        let data = AppError::AuthRequired("https://example.test/auth".to_owned()).to_error_data();
        assert!(data.message.contains("https://example.test/auth"));
        assert!(data.message.contains("try your request again"));
    }

    #[test]
    fn session_expired_message_names_expiry_not_generic_failure() {
        let data = AppError::SessionExpired("https://example.test/auth".to_owned()).to_error_data();
        assert!(data.message.contains("session has expired"));
        assert!(data.message.contains("https://example.test/auth"));
    }
}

//! Gmail REST client bound to a single grant
//!
//! The authenticated client handle: thin pass-through calls to the Gmail v1
//! API, one HTTP request in, one JSON value out. Remote failures carry the
//! HTTP status line in the error message so the session layer can classify
//! them without inspecting response objects.

use serde_json::{Value, json};

use crate::email;
use crate::errors::{AppError, AppResult};
use crate::token_store::Grant;

/// Gmail v1 API base for the authenticated user
const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Live handle bound to one grant
///
/// Recreated by the session whenever the grant changes; never outlives the
/// grant it was built from.
#[derive(Debug, Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    grant: Grant,
}

impl GmailClient {
    /// Bind a handle to a grant
    pub fn new(http: reqwest::Client, grant: Grant) -> Self {
        Self { http, grant }
    }

    /// The grant this handle is bound to
    pub fn grant(&self) -> &Grant {
        &self.grant
    }

    /// List messages with optional query filtering
    pub async fn list_messages(
        &self,
        max_results: u32,
        q: Option<&str>,
        include_spam_trash: bool,
    ) -> AppResult<Value> {
        let mut query = vec![
            ("maxResults", max_results.to_string()),
            ("includeSpamTrash", include_spam_trash.to_string()),
        ];
        if let Some(q) = q {
            query.push(("q", q.to_owned()));
        }

        let data = self
            .execute(self.http.get(format!("{API_BASE}/messages")).query(&query))
            .await
            .map_err(|e| remote_context("Failed to list messages", e))?;
        Ok(data.get("messages").cloned().unwrap_or_else(|| json!([])))
    }

    /// Search messages, passing pagination hints through
    pub async fn search_messages(
        &self,
        query: &str,
        max_results: u32,
        include_spam_trash: bool,
    ) -> AppResult<Value> {
        let params = [
            ("q", query.to_owned()),
            ("maxResults", max_results.to_string()),
            ("includeSpamTrash", include_spam_trash.to_string()),
        ];
        let data = self
            .execute(self.http.get(format!("{API_BASE}/messages")).query(&params))
            .await
            .map_err(|e| remote_context(&format!("Failed to search messages with query \"{query}\""), e))?;

        Ok(json!({
            "messages": data.get("messages").cloned().unwrap_or_else(|| json!([])),
            "resultSizeEstimate": data.get("resultSizeEstimate").cloned().unwrap_or(Value::Null),
            "nextPageToken": data.get("nextPageToken").cloned().unwrap_or(Value::Null),
        }))
    }

    /// List messages carrying the STARRED label
    pub async fn list_starred_messages(&self, max_results: u32) -> AppResult<Value> {
        let params = [
            ("q", "is:starred".to_owned()),
            ("maxResults", max_results.to_string()),
        ];
        let data = self
            .execute(self.http.get(format!("{API_BASE}/messages")).query(&params))
            .await
            .map_err(|e| remote_context("Failed to list starred messages", e))?;
        Ok(data.get("messages").cloned().unwrap_or_else(|| json!([])))
    }

    /// Get a single message by ID in the requested format
    pub async fn get_message(&self, id: &str, format: &str) -> AppResult<Value> {
        self.execute(
            self.http
                .get(format!("{API_BASE}/messages/{}", urlencoding::encode(id)))
                .query(&[("format", format)]),
        )
        .await
        .map_err(|e| remote_context(&format!("Failed to get message {id}"), e))
    }

    /// Get a full thread by ID in the requested format
    pub async fn get_thread(&self, id: &str, format: &str) -> AppResult<Value> {
        self.execute(
            self.http
                .get(format!("{API_BASE}/threads/{}", urlencoding::encode(id)))
                .query(&[("format", format)]),
        )
        .await
        .map_err(|e| remote_context(&format!("Failed to get thread {id}"), e))
    }

    /// Fetch one attachment body by message and attachment ID
    pub async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> AppResult<Value> {
        self.execute(self.http.get(format!(
            "{API_BASE}/messages/{}/attachments/{}",
            urlencoding::encode(message_id),
            urlencoding::encode(attachment_id)
        )))
        .await
        .map_err(|e| {
            remote_context(
                &format!("Failed to get attachment {attachment_id} from message {message_id}"),
                e,
            )
        })
    }

    /// List all labels in the mailbox
    pub async fn list_labels(&self) -> AppResult<Value> {
        let data = self
            .execute(self.http.get(format!("{API_BASE}/labels")))
            .await
            .map_err(|e| remote_context("Failed to list labels", e))?;
        Ok(data.get("labels").cloned().unwrap_or_else(|| json!([])))
    }

    /// Add and/or remove labels on a message
    pub async fn modify_labels(
        &self,
        id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> AppResult<Value> {
        self.execute(
            self.http
                .post(format!("{API_BASE}/messages/{}/modify", urlencoding::encode(id)))
                .json(&json!({
                    "addLabelIds": add_label_ids,
                    "removeLabelIds": remove_label_ids,
                })),
        )
        .await
        .map_err(|e| remote_context(&format!("Failed to modify labels for message {id}"), e))
    }

    /// Star a message (adds the STARRED label)
    pub async fn star_message(&self, id: &str) -> AppResult<Value> {
        self.execute(
            self.http
                .post(format!("{API_BASE}/messages/{}/modify", urlencoding::encode(id)))
                .json(&json!({ "addLabelIds": ["STARRED"], "removeLabelIds": [] })),
        )
        .await
        .map_err(|e| remote_context(&format!("Failed to star message {id}"), e))
    }

    /// Send a plain-text email
    pub async fn send_email(&self, to: &str, subject: &str, body: &str) -> AppResult<Value> {
        let raw = email::make_raw_message(to, subject, body);
        self.execute(
            self.http
                .post(format!("{API_BASE}/messages/send"))
                .json(&json!({ "raw": raw })),
        )
        .await
        .map_err(|e| remote_context("Failed to send email", e))
    }

    /// Create a draft without sending it
    pub async fn create_draft(&self, to: &str, subject: &str, body: &str) -> AppResult<Value> {
        let raw = email::make_raw_message(to, subject, body);
        self.execute(
            self.http
                .post(format!("{API_BASE}/drafts"))
                .json(&json!({ "message": { "raw": raw } })),
        )
        .await
        .map_err(|e| remote_context("Failed to create draft", e))
    }

    /// Trash a message, or permanently delete it when `permanent` is set
    pub async fn delete_message(&self, id: &str, permanent: bool) -> AppResult<Value> {
        let encoded = urlencoding::encode(id).into_owned();
        if permanent {
            self.execute(self.http.delete(format!("{API_BASE}/messages/{encoded}")))
                .await
                .map_err(|e| remote_context(&format!("Failed to delete message {id}"), e))?;
            Ok(json!({
                "success": true,
                "message": format!("Message {id} permanently deleted."),
            }))
        } else {
            self.execute(self.http.post(format!("{API_BASE}/messages/{encoded}/trash")))
                .await
                .map_err(|e| remote_context(&format!("Failed to trash message {id}"), e))?;
            Ok(json!({
                "success": true,
                "message": format!("Message {id} moved to trash."),
            }))
        }
    }

    /// Send one request with the bearer token attached and parse the response
    ///
    /// Non-2xx responses become `Remote` errors of the form
    /// `"<status line>: <body>"` (e.g. `"401 Unauthorized: ..."`), which is
    /// what the session-layer classification keys on. An empty success body
    /// (permanent delete returns 204) maps to JSON null.
    async fn execute(&self, request: reqwest::RequestBuilder) -> AppResult<Value> {
        let response = request
            .bearer_auth(&self.grant.access_token)
            .send()
            .await
            .map_err(|e| AppError::Remote(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Remote(format!("cannot read response body: {e}")))?;

        if !status.is_success() {
            return Err(AppError::Remote(format!("{status}: {}", body.trim())));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| AppError::Remote(format!("unparseable response body: {e}")))
    }
}

/// Prefix remote failures with operation context, leaving other variants alone
fn remote_context(prefix: &str, err: AppError) -> AppError {
    match err {
        AppError::Remote(msg) => AppError::Remote(format!("{prefix}: {msg}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::AppError;

    use super::remote_context;

    #[test]
    fn context_wraps_remote_and_preserves_status_indicator() {
        let err = remote_context(
            "Failed to list messages",
            AppError::Remote("401 Unauthorized: token expired".to_owned()),
        );
        assert_eq!(
            err.to_string(),
            "Failed to list messages: 401 Unauthorized: token expired"
        );
    }

    #[test]
    fn context_leaves_non_remote_variants_untouched() {
        let err = remote_context("ctx", AppError::Internal("boom".to_owned()));
        assert_eq!(err.to_string(), "internal error: boom");
    }
}

//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers 12 MCP tools. Handles
//! input validation, handle acquisition, and response formatting. All tools
//! funnel through one dispatch contract: acquire the authenticated handle,
//! run the call, and classify any failure as either a plain tool error or an
//! invalidation that clears the session and re-offers the flow URL.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};
use tracing::warn;

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::gmail::GmailClient;
use crate::models::{
    CreateDraftInput, DeleteMessageInput, GetAttachmentInput, GetMessageInput, GetThreadInput,
    ListMessagesInput, ListStarredMessagesInput, Meta, ModifyLabelsInput, SearchMessagesInput,
    SendEmailInput, StarMessageInput, ToolEnvelope,
};
use crate::session::{Acquired, Session, is_auth_error};

/// Upper bound the API accepts for `maxResults`
const MAX_RESULTS_LIMIT: u32 = 500;

/// Gmail MCP server
///
/// Holds the shared session. Implements MCP tool handlers via the `#[tool]`
/// attribute macro and `ServerHandler` trait.
#[derive(Clone)]
pub struct GmailMcpServer {
    /// Session manager owning the grant and client handle
    session: Arc<Session>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GmailMcpServer {
    /// Create a new MCP server instance
    pub fn new(config: ServerConfig) -> Self {
        Self {
            session: Arc::new(Session::new(config)),
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: List messages in the mailbox
    #[tool(
        name = "gmail_list_messages",
        description = "List messages in the user's mailbox with optional query filtering"
    )]
    async fn list_messages(
        &self,
        Parameters(input): Parameters<ListMessagesInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.list_messages_impl(input).await.map(|data| {
                (
                    format!("{} message(s) returned", data.as_array().map_or(0, Vec::len)),
                    data,
                )
            }),
        )
    }

    /// Tool: Search messages with Gmail's query format
    #[tool(
        name = "gmail_search_messages",
        description = "Search messages using Gmail's query format (from:, subject:, is:unread, newer_than:7d, ...)"
    )]
    async fn search_messages(
        &self,
        Parameters(input): Parameters<SearchMessagesInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.search_messages_impl(input).await.map(|data| {
                (
                    format!(
                        "{} message(s) matched",
                        data["messages"].as_array().map_or(0, Vec::len)
                    ),
                    data,
                )
            }),
        )
    }

    /// Tool: Get a message by ID
    #[tool(
        name = "gmail_get_message",
        description = "Get the full content of a specific message by ID"
    )]
    async fn get_message(
        &self,
        Parameters(input): Parameters<GetMessageInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.get_message_impl(input)
                .await
                .map(|data| ("Message retrieved".to_owned(), data)),
        )
    }

    /// Tool: Get a thread by ID
    #[tool(
        name = "gmail_get_thread",
        description = "Get all messages in a thread by thread ID"
    )]
    async fn get_thread(
        &self,
        Parameters(input): Parameters<GetThreadInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.get_thread_impl(input).await.map(|data| {
                (
                    format!(
                        "Thread with {} message(s) retrieved",
                        data["messages"].as_array().map_or(0, Vec::len)
                    ),
                    data,
                )
            }),
        )
    }

    /// Tool: Fetch an attachment body
    #[tool(
        name = "gmail_get_attachment",
        description = "Get a specific attachment from a message by attachment ID"
    )]
    async fn get_attachment(
        &self,
        Parameters(input): Parameters<GetAttachmentInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.get_attachment_impl(input)
                .await
                .map(|data| ("Attachment retrieved".to_owned(), data)),
        )
    }

    /// Tool: List mailbox labels
    #[tool(name = "gmail_list_labels", description = "List all labels in the user's mailbox")]
    async fn list_labels(&self) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        let result = self
            .with_client(|client| async move { client.list_labels().await })
            .await
            .map(|data| {
                (
                    format!("{} label(s)", data.as_array().map_or(0, Vec::len)),
                    data,
                )
            });
        finalize_tool(started, result)
    }

    /// Tool: Add or remove labels on a message
    #[tool(
        name = "gmail_modify_labels",
        description = "Add and/or remove labels on a message"
    )]
    async fn modify_labels(
        &self,
        Parameters(input): Parameters<ModifyLabelsInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.modify_labels_impl(input)
                .await
                .map(|data| ("Labels updated".to_owned(), data)),
        )
    }

    /// Tool: Star a message
    #[tool(
        name = "gmail_star_message",
        description = "Star a message by adding the STARRED label"
    )]
    async fn star_message(
        &self,
        Parameters(input): Parameters<StarMessageInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.star_message_impl(input)
                .await
                .map(|data| ("Message starred".to_owned(), data)),
        )
    }

    /// Tool: List starred messages
    #[tool(
        name = "gmail_list_starred_messages",
        description = "List starred messages in the user's mailbox"
    )]
    async fn list_starred_messages(
        &self,
        Parameters(input): Parameters<ListStarredMessagesInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.list_starred_messages_impl(input).await.map(|data| {
                (
                    format!(
                        "{} starred message(s) returned",
                        data.as_array().map_or(0, Vec::len)
                    ),
                    data,
                )
            }),
        )
    }

    /// Tool: Send an email
    #[tool(name = "gmail_send_email", description = "Send a plain-text email to a recipient")]
    async fn send_email(
        &self,
        Parameters(input): Parameters<SendEmailInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.send_email_impl(input)
                .await
                .map(|data| ("Email sent".to_owned(), data)),
        )
    }

    /// Tool: Create a draft
    #[tool(
        name = "gmail_create_draft",
        description = "Create a draft email without sending it"
    )]
    async fn create_draft(
        &self,
        Parameters(input): Parameters<CreateDraftInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.create_draft_impl(input)
                .await
                .map(|data| ("Draft created".to_owned(), data)),
        )
    }

    /// Tool: Delete or trash a message
    #[tool(
        name = "gmail_delete_message",
        description = "Move a message to trash, or permanently delete it with permanent=true"
    )]
    async fn delete_message(
        &self,
        Parameters(input): Parameters<DeleteMessageInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.delete_message_impl(input).await.map(|data| {
                let summary = data["message"]
                    .as_str()
                    .unwrap_or("Message deleted")
                    .to_owned();
                (summary, data)
            }),
        )
    }
}

/// MCP server handler implementation
///
/// Provides server info and capabilities to the MCP client.
#[tool_handler(router = self.tool_router)]
impl ServerHandler for GmailMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.instructions = Some(
            "Gmail MCP server. The first tool call returns an authentication URL when no grant is stored; complete the flow in your browser, then retry the request.".to_owned(),
        );
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info
    }
}

/// Tool implementation methods
///
/// Private methods handle validation and the remote call for each tool,
/// separated from the public `#[tool]` methods that handle response
/// formatting.
impl GmailMcpServer {
    /// One dispatch contract for every remote call
    ///
    /// Acquires the handle (surfacing the auth-required URL when no grant
    /// exists), runs the operation, and on an authentication-class failure
    /// clears the session, restarts the flow, and reports "session expired"
    /// with the fresh URL. Exactly one reset-and-reauth cycle per failure;
    /// all other errors pass through untouched.
    async fn with_client<T, F, Fut>(&self, op: F) -> AppResult<T>
    where
        F: FnOnce(Arc<GmailClient>) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let client = match self.session.acquire().await? {
            Acquired::Ready(client) => client,
            Acquired::AuthRequired(url) => return Err(AppError::AuthRequired(url)),
        };

        match op(client).await {
            Ok(value) => Ok(value),
            Err(e) if is_auth_error(&e.to_string()) => {
                warn!("authentication-class failure, resetting session: {e}");
                self.session.invalidate().await;
                let url = self.session.begin_reauth().await?;
                Err(AppError::SessionExpired(url))
            }
            Err(e) => Err(e),
        }
    }

    async fn list_messages_impl(&self, input: ListMessagesInput) -> AppResult<serde_json::Value> {
        validate_max_results(input.max_results)?;
        if let Some(q) = &input.q {
            validate_query(q)?;
        }
        self.with_client(move |client| async move {
            client
                .list_messages(input.max_results, input.q.as_deref(), input.include_spam_trash)
                .await
        })
        .await
    }

    async fn search_messages_impl(
        &self,
        input: SearchMessagesInput,
    ) -> AppResult<serde_json::Value> {
        validate_max_results(input.max_results)?;
        validate_query(&input.query)?;
        self.with_client(move |client| async move {
            client
                .search_messages(&input.query, input.max_results, input.include_spam_trash)
                .await
        })
        .await
    }

    async fn get_message_impl(&self, input: GetMessageInput) -> AppResult<serde_json::Value> {
        validate_id(&input.id, "id")?;
        validate_format(&input.format)?;
        self.with_client(move |client| async move {
            client.get_message(&input.id, &input.format).await
        })
        .await
    }

    async fn get_thread_impl(&self, input: GetThreadInput) -> AppResult<serde_json::Value> {
        validate_id(&input.id, "id")?;
        validate_format(&input.format)?;
        self.with_client(move |client| async move {
            client.get_thread(&input.id, &input.format).await
        })
        .await
    }

    async fn get_attachment_impl(&self, input: GetAttachmentInput) -> AppResult<serde_json::Value> {
        validate_id(&input.message_id, "messageId")?;
        validate_id(&input.attachment_id, "attachmentId")?;
        self.with_client(move |client| async move {
            client
                .get_attachment(&input.message_id, &input.attachment_id)
                .await
        })
        .await
    }

    async fn modify_labels_impl(&self, input: ModifyLabelsInput) -> AppResult<serde_json::Value> {
        validate_id(&input.id, "id")?;
        if input.add_label_ids.is_empty() && input.remove_label_ids.is_empty() {
            return Err(AppError::invalid(
                "at least one of addLabelIds/removeLabelIds is required",
            ));
        }
        for label in input.add_label_ids.iter().chain(&input.remove_label_ids) {
            validate_id(label, "label id")?;
        }
        self.with_client(move |client| async move {
            client
                .modify_labels(&input.id, &input.add_label_ids, &input.remove_label_ids)
                .await
        })
        .await
    }

    async fn star_message_impl(&self, input: StarMessageInput) -> AppResult<serde_json::Value> {
        validate_id(&input.id, "id")?;
        self.with_client(move |client| async move { client.star_message(&input.id).await })
            .await
    }

    async fn list_starred_messages_impl(
        &self,
        input: ListStarredMessagesInput,
    ) -> AppResult<serde_json::Value> {
        validate_max_results(input.max_results)?;
        self.with_client(move |client| async move {
            client.list_starred_messages(input.max_results).await
        })
        .await
    }

    async fn send_email_impl(&self, input: SendEmailInput) -> AppResult<serde_json::Value> {
        validate_recipient(&input.to)?;
        validate_header_value(&input.subject, "subject")?;
        self.with_client(move |client| async move {
            client
                .send_email(&input.to, &input.subject, &input.body)
                .await
        })
        .await
    }

    async fn create_draft_impl(&self, input: CreateDraftInput) -> AppResult<serde_json::Value> {
        validate_recipient(&input.to)?;
        validate_header_value(&input.subject, "subject")?;
        self.with_client(move |client| async move {
            client
                .create_draft(&input.to, &input.subject, &input.body)
                .await
        })
        .await
    }

    async fn delete_message_impl(&self, input: DeleteMessageInput) -> AppResult<serde_json::Value> {
        validate_id(&input.id, "id")?;
        self.with_client(move |client| async move {
            client.delete_message(&input.id, input.permanent).await
        })
        .await
    }
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => Err(e.to_error_data()),
    }
}

/// Validate a message/thread/attachment/label identifier
fn validate_id(id: &str, field: &str) -> AppResult<()> {
    if id.is_empty() || id.len() > 128 {
        return Err(AppError::InvalidInput(format!(
            "{field} must be 1..128 characters"
        )));
    }
    if id.chars().any(|ch| ch.is_ascii_control() || ch.is_whitespace()) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain whitespace or control characters"
        )));
    }
    Ok(())
}

/// Validate a search query string
fn validate_query(query: &str) -> AppResult<()> {
    if query.is_empty() || query.len() > 512 {
        return Err(AppError::invalid("query must be 1..512 characters"));
    }
    if query.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::invalid("query must not contain control characters"));
    }
    Ok(())
}

/// Validate the requested message format
fn validate_format(format: &str) -> AppResult<()> {
    match format {
        "full" | "minimal" | "raw" | "metadata" => Ok(()),
        _ => Err(AppError::invalid(
            "format must be one of full, minimal, raw, metadata",
        )),
    }
}

/// Validate the max results bound
fn validate_max_results(value: u32) -> AppResult<()> {
    if value == 0 || value > MAX_RESULTS_LIMIT {
        return Err(AppError::InvalidInput(format!(
            "maxResults must be in range 1..{MAX_RESULTS_LIMIT}"
        )));
    }
    Ok(())
}

/// Validate a recipient address (shape only; the provider does the rest)
fn validate_recipient(to: &str) -> AppResult<()> {
    if to.is_empty() || to.len() > 256 || !to.contains('@') {
        return Err(AppError::invalid("to must be a plausible email address"));
    }
    validate_header_value(to, "to")
}

/// Reject line breaks and control characters in header-bound values
fn validate_header_value(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        validate_format, validate_header_value, validate_id, validate_max_results,
        validate_query, validate_recipient,
    };

    #[test]
    fn rejects_empty_and_whitespace_ids() {
        assert!(validate_id("", "id").is_err());
        assert!(validate_id("two words", "id").is_err());
        assert!(validate_id("18c9f2ab3d1e", "id").is_ok());
    }

    #[test]
    fn rejects_header_injection_in_subject() {
        let err = validate_header_value("hi\r\nBcc: other@example.com", "subject")
            .expect_err("must fail");
        assert!(err.to_string().contains("control characters"));
        assert!(validate_header_value("ordinary subject", "subject").is_ok());
    }

    #[test]
    fn recipient_requires_at_sign() {
        assert!(validate_recipient("not-an-address").is_err());
        assert!(validate_recipient("user@example.com").is_ok());
    }

    #[test]
    fn bounds_max_results() {
        assert!(validate_max_results(0).is_err());
        assert!(validate_max_results(501).is_err());
        assert!(validate_max_results(10).is_ok());
    }

    #[test]
    fn accepts_known_formats_only() {
        assert!(validate_format("full").is_ok());
        assert!(validate_format("rfc822").is_err());
    }

    #[test]
    fn rejects_control_chars_in_query() {
        assert!(validate_query("from:a@example.com\nis:unread").is_err());
        assert!(validate_query("from:a@example.com is:unread").is_ok());
    }
}

//! Input/output DTOs and schema-bearing types
//!
//! Defines all data structures used in MCP tool contracts. Each type is
//! annotated with `JsonSchema` for automatic schema generation. Wire names
//! are camelCase, matching the Gmail API parameter naming.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metadata included in all tool responses
///
/// Provides timing information and current UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// Input: list messages
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesInput {
    /// Maximum number of messages to return (default 10)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Query string to filter messages (e.g., `from:user@example.com is:unread`)
    pub q: Option<String>,
    /// Whether to include messages from SPAM and TRASH
    #[serde(default)]
    pub include_spam_trash: bool,
}

/// Input: search messages with Gmail's query format
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchMessagesInput {
    /// Gmail search query (e.g., `subject:invoice newer_than:7d`)
    pub query: String,
    /// Maximum number of messages to return (default 10)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Whether to include messages from SPAM and TRASH
    #[serde(default)]
    pub include_spam_trash: bool,
}

/// Input: get a single message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetMessageInput {
    /// The ID of the message to retrieve
    pub id: String,
    /// Format to return the message in (full, minimal, raw, metadata)
    #[serde(default = "default_format")]
    pub format: String,
}

/// Input: get a full thread
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetThreadInput {
    /// The ID of the thread to retrieve
    pub id: String,
    /// Format to return the messages in (full, minimal, metadata)
    #[serde(default = "default_format")]
    pub format: String,
}

/// Input: fetch one attachment
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetAttachmentInput {
    /// The ID of the message containing the attachment
    pub message_id: String,
    /// The ID of the attachment to retrieve
    pub attachment_id: String,
}

/// Input: modify labels on a message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModifyLabelsInput {
    /// The ID of the message to modify
    pub id: String,
    /// Label IDs to add (e.g., `STARRED`, `IMPORTANT`)
    #[serde(default)]
    pub add_label_ids: Vec<String>,
    /// Label IDs to remove (e.g., `UNREAD`)
    #[serde(default)]
    pub remove_label_ids: Vec<String>,
}

/// Input: star a message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StarMessageInput {
    /// The ID of the message to star
    pub id: String,
}

/// Input: list starred messages
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListStarredMessagesInput {
    /// Maximum number of messages to return (default 10)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

/// Input: send an email
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailInput {
    /// Email address of the recipient
    pub to: String,
    /// Subject of the email
    pub subject: String,
    /// Body content of the email (plain text)
    pub body: String,
}

/// Input: create a draft without sending
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateDraftInput {
    /// Email address of the recipient
    pub to: String,
    /// Subject of the email
    pub subject: String,
    /// Body content of the email
    pub body: String,
}

/// Input: delete or trash a message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageInput {
    /// The ID of the message to delete
    pub id: String,
    /// Permanently delete instead of moving to trash
    #[serde(default)]
    pub permanent: bool,
}

/// Default value for `max_results` fields
///
/// Most callers need only the first few relevant messages; pagination hints
/// are passed through for the rest.
fn default_max_results() -> u32 {
    10
}

/// Default message/thread format
fn default_format() -> String {
    "full".to_owned()
}

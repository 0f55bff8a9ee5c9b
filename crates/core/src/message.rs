//! Message and Conversation domain types.
//!
//! A [`Conversation`] is the ordered message log the orchestration loop
//! sends to the model on every iteration. It always starts with exactly
//! one system message, rendered from the configured prompt plus the
//! system metadata block.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder replaced with the current time in system prompts.
pub const TIME_PLACEHOLDER: &str = "{time}";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call ID, echoed back in the tool result message
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON-encoded text, exactly as the model produced them
    pub arguments: String,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (assistant role only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// The tool call this message answers (tool role only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content.into());
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }
}

/// Key/value pairs appended to the system prompt, plus the timezone used
/// to render `{time}`.
#[derive(Debug, Clone)]
pub struct SystemMetadata {
    pub entries: BTreeMap<String, String>,
    pub timezone: Tz,
}

impl SystemMetadata {
    pub fn new(entries: BTreeMap<String, String>, timezone: Tz) -> Self {
        Self { entries, timezone }
    }

    /// Render the full system message for the given prompt at `now`.
    pub fn render<Z: TimeZone>(&self, prompt: &str, now: DateTime<Z>) -> String {
        let time = now.with_timezone(&self.timezone).format(TIME_FORMAT).to_string();
        let mut rendered = prompt.replace(TIME_PLACEHOLDER, &time);

        if !self.entries.is_empty() {
            rendered.push_str("\n---\n## System Metadata\n");
            for (key, value) in &self.entries {
                rendered.push_str(&format!("- {key}: {}\n", value.replace(TIME_PLACEHOLDER, &time)));
            }
        }
        rendered
    }
}

impl Default for SystemMetadata {
    fn default() -> Self {
        Self::new(BTreeMap::new(), Tz::UTC)
    }
}

/// Ordered message log for one chat session.
///
/// Messages can only be appended through the typed `push_*` methods, which
/// keeps the single leading system message intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a conversation whose system message is rendered now.
    pub fn new(system_prompt: &str, metadata: &SystemMetadata) -> Self {
        Self::with_id(ConversationId::new(), system_prompt, metadata)
    }

    pub fn with_id(id: ConversationId, system_prompt: &str, metadata: &SystemMetadata) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: vec![Message::system(metadata.render(system_prompt, now))],
            created_at: now,
            updated_at: now,
        }
    }

    /// All messages, system message first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn system_message(&self) -> &Message {
        &self.messages[0]
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>, tool_calls: Vec<ToolCall>) {
        self.push(Message::assistant_with_tools(content, tool_calls));
    }

    pub fn push_tool_result(&mut self, tool_call_id: impl Into<String>, content: impl Into<String>) {
        self.push(Message::tool_result(tool_call_id, content));
    }

    /// Drop the history, keeping the system message.
    pub fn clear(&mut self) {
        self.messages.truncate(1);
        self.updated_at = Utc::now();
    }

    /// Number of non-system messages.
    pub fn history_len(&self) -> usize {
        self.messages.len() - 1
    }
}

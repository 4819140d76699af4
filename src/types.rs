use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One conversation turn. Created on intake or as a tool result, never
/// mutated in place — compaction and capping produce new messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    /// Tool invocations requested by an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_use: Vec<ToolUse>,
    /// Results carried by a tool turn. Each block references a prior
    /// `ToolUse.id` from the same run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_result: Vec<ToolResultBlock>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            session_id: session_id.into(),
            tool_use: Vec::new(),
            tool_result: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::new(Role::System, content, session_id)
    }

    pub fn user(content: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::new(Role::User, content, session_id)
    }

    pub fn assistant(content: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, session_id)
    }

    pub fn tool(content: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::new(Role::Tool, content, session_id)
    }

    pub fn with_tool_use(mut self, tool_use: Vec<ToolUse>) -> Self {
        self.tool_use = tool_use;
        self
    }

    pub fn with_tool_result(mut self, block: ToolResultBlock) -> Self {
        self.tool_result.push(block);
        self
    }
}

/// A tool invocation the model asked for. `id` is unique within an
/// iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The result half of a tool roundtrip, attached to a tool-role message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Uniform envelope returned by the tool registry. Exactly one of
/// `result`/`error` is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(name: impl Into<String>, result: Value, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            result: Some(result),
            error: None,
            duration_ms,
        }
    }

    pub fn err(name: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            result: None,
            error: Some(error.into()),
            duration_ms,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A conversation owned by a session authority. The core reads and
/// appends; archival policy and on-disk shape are the host's business.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub channel: String,
    pub messages: Vec<Message>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            channel: channel.into(),
            messages: Vec::new(),
            started_at: now,
            last_activity: now,
            metadata: Value::Null,
            parent_id: None,
        }
    }
}

/// One typed record decoded from a model's byte stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    TextDelta { text: String },
    ToolUseStart { id: String, name: String },
    ToolUseDelta { id: String, partial: String },
    ToolUseEnd { id: String },
    MessageStop,
}

/// Estimated token spend for a run, accumulated across iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

//! Core types for agent tasks and their transcripts

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a task on the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

/// Identifier of the agent that runs a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token usage snapshot for a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Context window of the model driving the task
    pub max_tokens: u64,
}

/// A task as returned by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub usage: TaskUsage,
}

impl Task {
    /// Create an empty task
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            title: String::new(),
            agent_id: None,
            messages: vec![],
            usage: TaskUsage::default(),
        }
    }
}

/// Image reference inside user content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One part of a multi-part user message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// User message content: plain text or a list of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of the content, skipping non-text parts
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// Function call recorded on a finalized assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

/// Name and raw JSON arguments of a function call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Approval state of a tool call that needs the user's permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserApprovalStatus {
    Pending,
    Approved,
    Denied,
}

/// Decision the user can submit for a pending tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Approved,
    Denied,
}

impl From<ReviewStatus> for UserApprovalStatus {
    fn from(status: ReviewStatus) -> Self {
        match status {
            ReviewStatus::Approved => UserApprovalStatus::Approved,
            ReviewStatus::Denied => UserApprovalStatus::Denied,
        }
    }
}

/// Metadata attached to tool messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_approval: Option<UserApprovalStatus>,
}

/// Message sent by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub content: MessageContent,
}

/// Message produced by the assistant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<AssistantToolCall>>,
    /// Provider usage payload, kept opaque
    #[serde(default)]
    pub usage: Option<serde_json::Value>,
}

/// A tool invocation and, once settled, its outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub tool_call_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: ToolMetadata,
}

/// System prompt message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
}

/// Transcript message, discriminated by role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    Tool(ToolMessage),
    System(SystemMessage),
}

impl Message {
    /// Create a user message with text content and no id yet
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(UserMessage {
            id: None,
            content: MessageContent::Text(text.into()),
        })
    }

    /// Create the empty assistant message that a streamed turn fills in
    pub fn assistant_placeholder(id: impl Into<String>) -> Self {
        Self::Assistant(AssistantMessage {
            id: Some(id.into()),
            content: Some(String::new()),
            ..Default::default()
        })
    }

    /// Create an unsettled tool message from streamed call data
    pub fn tool_call(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::Tool(ToolMessage {
            id: None,
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
            result: None,
            error: None,
            metadata: ToolMetadata::default(),
        })
    }

    /// Get the role as a string
    pub fn role(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Assistant(_) => "assistant",
            Self::Tool(_) => "tool",
            Self::System(_) => "system",
        }
    }

    /// Stable identifier, if the server has assigned one
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::User(m) => m.id.as_deref(),
            Self::Assistant(m) => m.id.as_deref(),
            Self::Tool(m) => m.id.as_deref(),
            Self::System(m) => m.id.as_deref(),
        }
    }

    /// Borrow as a tool message
    pub fn as_tool(&self) -> Option<&ToolMessage> {
        match self {
            Self::Tool(tool) => Some(tool),
            _ => None,
        }
    }

    /// Mutably borrow as a tool message
    pub fn as_tool_mut(&mut self) -> Option<&mut ToolMessage> {
        match self {
            Self::Tool(tool) => Some(tool),
            _ => None,
        }
    }

    /// Whether this is the tool message for the given call id
    pub fn is_tool_call(&self, tool_call_id: &str) -> bool {
        self.as_tool()
            .is_some_and(|tool| tool.tool_call_id == tool_call_id)
    }

    /// Get combined text content
    pub fn text(&self) -> String {
        match self {
            Self::User(m) => m.content.text(),
            Self::Assistant(m) => m.content.clone().unwrap_or_default(),
            Self::Tool(m) => m
                .result
                .clone()
                .or_else(|| m.error.clone())
                .unwrap_or_default(),
            Self::System(m) => m.content.clone(),
        }
    }
}

/// One streamed fragment of a tool call, addressed by position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunk {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}

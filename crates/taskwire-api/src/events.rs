//! Task stream event types and decoding

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{Message, TaskUsage, ToolCallChunk, ToolMessage};

/// Usage fields carried by a `usage` chunk; absent fields leave the snapshot untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageChunk {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
}

impl UsageChunk {
    /// Shallow-merge into a usage snapshot
    pub fn merge_into(&self, usage: &mut TaskUsage) {
        if let Some(v) = self.input_tokens {
            usage.input_tokens = v;
        }
        if let Some(v) = self.output_tokens {
            usage.output_tokens = v;
        }
        if let Some(v) = self.total_tokens {
            usage.total_tokens = v;
        }
        if let Some(v) = self.max_tokens {
            usage.max_tokens = v;
        }
    }
}

/// Partial content of the assistant turn being streamed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageChunk {
    /// Text delta
    Text { content: String },
    /// Usage update
    Usage(UsageChunk),
    /// Tool call delta
    ToolCall { data: ToolCallChunk },
}

/// Events delivered on a task stream
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Assistant message streaming started
    MessageStart { message_id: String },
    /// Partial content of the current assistant message
    MessageChunk(MessageChunk),
    /// Assistant message finalized
    MessageEnd { message: Message },
    /// Server correction of an already finalized message
    MessageReplace { message: Message },
    /// Tool call finalized
    ToolCallEnd { message: ToolMessage },
    /// Tool finished executing
    ToolExecuted {
        tool_call_id: String,
        result: Option<String>,
    },
    /// A tool waits for the user's answer
    ToolRequireUserResponse { tool_name: String },
    /// A tool waits for the user's approval
    ToolRequirePermission { tool_call_id: String },
    /// The task finished
    TaskDone,
    /// The task was interrupted server-side
    TaskInterrupted,
    /// The server reported a failure
    Error { message: String },
    /// An event name this client does not understand
    Unknown { event: String },
}

#[derive(Deserialize)]
struct MessageStartData {
    message_id: String,
}

#[derive(Deserialize)]
struct MessageData {
    message: Message,
}

#[derive(Deserialize)]
struct ToolMessageData {
    message: ToolMessage,
}

#[derive(Deserialize)]
struct ToolExecutedData {
    tool_call_id: String,
    #[serde(default)]
    result: Option<String>,
}

#[derive(Deserialize)]
struct ToolNameData {
    tool_name: String,
}

#[derive(Deserialize)]
struct ToolCallIdData {
    tool_call_id: String,
}

#[derive(Deserialize)]
struct ErrorData {
    message: String,
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| Error::decode(event, e))
}

impl TaskEvent {
    /// Decode an event from its SSE name and JSON payload.
    ///
    /// Names are matched case-insensitively, so `MESSAGE_START` and
    /// `message_start` decode the same way.
    pub fn decode(event: &str, data: Value) -> Result<Self> {
        let name = event.to_ascii_lowercase();
        let decoded = match name.as_str() {
            "message_start" => {
                let MessageStartData { message_id } = payload(event, data)?;
                TaskEvent::MessageStart { message_id }
            }
            "message_chunk" => TaskEvent::MessageChunk(payload(event, data)?),
            "message_end" => {
                let MessageData { message } = payload(event, data)?;
                TaskEvent::MessageEnd { message }
            }
            "message_replace" => {
                let MessageData { message } = payload(event, data)?;
                TaskEvent::MessageReplace { message }
            }
            "tool_call_end" => {
                let ToolMessageData { message } = payload(event, data)?;
                TaskEvent::ToolCallEnd { message }
            }
            "tool_executed" => {
                let ToolExecutedData {
                    tool_call_id,
                    result,
                } = payload(event, data)?;
                TaskEvent::ToolExecuted {
                    tool_call_id,
                    result,
                }
            }
            "tool_require_user_response" => {
                let ToolNameData { tool_name } = payload(event, data)?;
                TaskEvent::ToolRequireUserResponse { tool_name }
            }
            "tool_require_permission" => {
                let ToolCallIdData { tool_call_id } = payload(event, data)?;
                TaskEvent::ToolRequirePermission { tool_call_id }
            }
            "task_done" => TaskEvent::TaskDone,
            "task_interrupted" => TaskEvent::TaskInterrupted,
            "error" => {
                let ErrorData { message } = payload(event, data)?;
                TaskEvent::Error { message }
            }
            _ => TaskEvent::Unknown {
                event: event.to_string(),
            },
        };
        Ok(decoded)
    }

    /// Check if this event ends the task stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskEvent::TaskDone | TaskEvent::TaskInterrupted)
    }
}

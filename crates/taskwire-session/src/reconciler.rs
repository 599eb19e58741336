//! Message reconciler
//!
//! Folds task stream events into the transcript. The reconciler owns the task
//! and both delta buffers; nothing else mutates the transcript.

use std::collections::HashMap;
use std::time::Duration;

use taskwire_api::{
    Message, MessageChunk, ReviewStatus, Task, TaskEvent, TaskUsage, ToolMessage,
    UserApprovalStatus, UserMessage,
};
use tokio::time::Instant;

use crate::buffer::{TextBuffer, ToolCallBuffer, ToolCallSnapshot};

/// Transcript changes produced by a reconciliation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Message at `index` was appended or changed
    Upserted { index: usize },
    /// Orphaned messages were removed
    Pruned { removed: usize },
    /// Usage snapshot changed
    Usage,
    PermissionRequired { tool_call_id: String },
    UserResponseRequired { tool_name: String },
}

/// Where a user's tool review stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    /// Sent to the server, not yet reflected in an authoritative message
    Requested(UserApprovalStatus),
    /// The server's tool message carries the decision
    Confirmed(UserApprovalStatus),
}

impl Approval {
    pub fn status(self) -> UserApprovalStatus {
        match self {
            Approval::Requested(status) | Approval::Confirmed(status) => status,
        }
    }
}

pub struct Reconciler {
    task: Task,
    text: TextBuffer,
    tool_calls: ToolCallBuffer,
    /// Id of the assistant message currently being streamed
    provisional: Option<String>,
    approvals: HashMap<String, Approval>,
}

impl Reconciler {
    pub fn new(task: Task, throttle_interval: Duration) -> Self {
        Self {
            task,
            text: TextBuffer::new(throttle_interval),
            tool_calls: ToolCallBuffer::new(throttle_interval),
            provisional: None,
            approvals: HashMap::new(),
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn messages(&self) -> &[Message] {
        &self.task.messages
    }

    pub fn usage(&self) -> &TaskUsage {
        &self.task.usage
    }

    pub fn into_task(self) -> Task {
        self.task
    }

    /// Apply one stream event
    pub fn apply(&mut self, event: &TaskEvent, now: Instant) -> Vec<Change> {
        match event {
            TaskEvent::MessageStart { message_id } => {
                self.clear_buffers();
                self.provisional = Some(message_id.clone());
                self.task
                    .messages
                    .push(Message::assistant_placeholder(message_id.clone()));
                vec![Change::Upserted {
                    index: self.task.messages.len() - 1,
                }]
            }

            TaskEvent::MessageChunk(MessageChunk::Text { content }) => {
                match self.text.accumulate(content, now) {
                    Some(text) => self.set_provisional_text(text).into_iter().collect(),
                    None => vec![],
                }
            }

            TaskEvent::MessageChunk(MessageChunk::ToolCall { data }) => {
                let snapshots = self.tool_calls.accumulate(data, now);
                self.apply_tool_snapshots(snapshots)
            }

            TaskEvent::MessageChunk(MessageChunk::Usage(chunk)) => {
                chunk.merge_into(&mut self.task.usage);
                vec![Change::Usage]
            }

            TaskEvent::MessageEnd { message } => {
                self.clear_buffers();
                self.replace_by_id(message).into_iter().collect()
            }

            TaskEvent::MessageReplace { message } => {
                self.replace_by_id(message).into_iter().collect()
            }

            TaskEvent::ToolCallEnd { message } => vec![self.upsert_tool(message.clone())],

            TaskEvent::ToolExecuted {
                tool_call_id,
                result,
            } => match self.find_tool(tool_call_id) {
                Some(index) => {
                    if let Some(tool) = self.task.messages[index].as_tool_mut() {
                        tool.result = result.clone();
                    }
                    vec![Change::Upserted { index }]
                }
                None => {
                    tracing::warn!("Tool message not found: {}", tool_call_id);
                    vec![]
                }
            },

            TaskEvent::ToolRequirePermission { tool_call_id } => {
                let mut changes = Vec::with_capacity(2);
                match self.find_tool(tool_call_id) {
                    Some(index) => {
                        if let Some(tool) = self.task.messages[index].as_tool_mut() {
                            tool.metadata.user_approval = Some(UserApprovalStatus::Pending);
                        }
                        changes.push(Change::Upserted { index });
                    }
                    None => tracing::warn!("Tool message not found: {}", tool_call_id),
                }
                changes.push(Change::PermissionRequired {
                    tool_call_id: tool_call_id.clone(),
                });
                changes
            }

            TaskEvent::ToolRequireUserResponse { tool_name } => {
                vec![Change::UserResponseRequired {
                    tool_name: tool_name.clone(),
                }]
            }

            // Lifecycle events are the state machine's business
            TaskEvent::TaskDone
            | TaskEvent::TaskInterrupted
            | TaskEvent::Error { .. }
            | TaskEvent::Unknown { .. } => vec![],
        }
    }

    /// Deliver buffer notifications whose deadline has passed
    pub fn flush_due(&mut self, now: Instant) -> Vec<Change> {
        let mut changes = Vec::new();
        if let Some(text) = self.text.flush_due(now) {
            changes.extend(self.set_provisional_text(text));
        }
        let snapshots = self.tool_calls.flush_due(now);
        changes.extend(self.apply_tool_snapshots(snapshots));
        changes
    }

    /// Earliest pending buffer notification
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.text.deadline(), self.tool_calls.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Drop buffered deltas and pending notifications
    pub fn clear_buffers(&mut self) {
        self.text.clear();
        self.tool_calls.clear();
    }

    /// End of stream: clear buffers and drop every message without a stable id
    pub fn close(&mut self) -> Vec<Change> {
        self.clear_buffers();
        self.provisional = None;

        let before = self.task.messages.len();
        self.task.messages.retain(|m| m.id().is_some());
        let removed = before - self.task.messages.len();
        if removed > 0 {
            tracing::debug!(removed, "removed orphaned messages");
            vec![Change::Pruned { removed }]
        } else {
            vec![]
        }
    }

    /// Append a user message, assigning a client id if it has none
    pub fn append_user(&mut self, message: UserMessage) -> (UserMessage, Change) {
        let message = with_client_id(message);
        self.task.messages.push(Message::User(message.clone()));
        (
            message,
            Change::Upserted {
                index: self.task.messages.len() - 1,
            },
        )
    }

    /// Record a review decision ahead of the server's confirmation
    pub fn request_review(&mut self, tool_call_id: &str, status: ReviewStatus) -> Option<Change> {
        let status = UserApprovalStatus::from(status);
        self.approvals
            .insert(tool_call_id.to_string(), Approval::Requested(status));

        match self.find_tool(tool_call_id) {
            Some(index) => {
                if let Some(tool) = self.task.messages[index].as_tool_mut() {
                    tool.metadata.user_approval = Some(status);
                }
                Some(Change::Upserted { index })
            }
            None => {
                tracing::warn!("Tool message not found: {}", tool_call_id);
                None
            }
        }
    }

    /// Review state of a tool call, if the user has reviewed it
    pub fn approval(&self, tool_call_id: &str) -> Option<Approval> {
        self.approvals.get(tool_call_id).copied()
    }

    fn set_provisional_text(&mut self, text: String) -> Option<Change> {
        let index = self.task.messages.len().checked_sub(1)?;
        let provisional = self.provisional.as_deref();
        match &mut self.task.messages[index] {
            Message::Assistant(assistant)
                if provisional.is_some() && assistant.id.as_deref() == provisional =>
            {
                assistant.content = Some(text);
                Some(Change::Upserted { index })
            }
            other => {
                tracing::warn!(
                    "Text chunk arrived but the last message is not the streaming assistant message (role: {})",
                    other.role()
                );
                None
            }
        }
    }

    fn apply_tool_snapshots(&mut self, snapshots: Vec<ToolCallSnapshot>) -> Vec<Change> {
        snapshots
            .into_iter()
            .filter_map(|snapshot| {
                if snapshot.id.is_empty() {
                    tracing::debug!(index = snapshot.index, "tool call has no id yet");
                    return None;
                }
                Some(match self.find_tool(&snapshot.id) {
                    Some(index) => {
                        if let Some(tool) = self.task.messages[index].as_tool_mut() {
                            tool.name = snapshot.name;
                            tool.arguments = snapshot.arguments;
                        }
                        Change::Upserted { index }
                    }
                    None => {
                        self.task.messages.push(Message::tool_call(
                            snapshot.id,
                            snapshot.name,
                            snapshot.arguments,
                        ));
                        Change::Upserted {
                            index: self.task.messages.len() - 1,
                        }
                    }
                })
            })
            .collect()
    }

    fn replace_by_id(&mut self, message: &Message) -> Option<Change> {
        let Some(id) = message.id() else {
            tracing::warn!("Finalized {} message has no id", message.role());
            return None;
        };
        let Some(index) = self.task.messages.iter().position(|m| m.id() == Some(id)) else {
            tracing::warn!("Message not found: {}", id);
            return None;
        };

        if self.provisional.as_deref() == Some(id) {
            self.provisional = None;
        }
        if let Message::Tool(tool) = message {
            self.confirm_review(tool);
        }
        self.task.messages[index] = message.clone();
        Some(Change::Upserted { index })
    }

    fn upsert_tool(&mut self, message: ToolMessage) -> Change {
        self.confirm_review(&message);
        let index = match self.find_tool(&message.tool_call_id) {
            Some(index) => {
                self.task.messages[index] = Message::Tool(message);
                index
            }
            None => {
                self.task.messages.push(Message::Tool(message));
                self.task.messages.len() - 1
            }
        };
        Change::Upserted { index }
    }

    fn confirm_review(&mut self, tool: &ToolMessage) {
        let Some(approval) = self.approvals.get_mut(&tool.tool_call_id) else {
            return;
        };
        match tool.metadata.user_approval {
            Some(status @ (UserApprovalStatus::Approved | UserApprovalStatus::Denied)) => {
                *approval = Approval::Confirmed(status);
            }
            Some(UserApprovalStatus::Pending) | None => {}
        }
    }

    fn find_tool(&self, tool_call_id: &str) -> Option<usize> {
        self.task
            .messages
            .iter()
            .position(|m| m.is_tool_call(tool_call_id))
    }
}

/// Give a user message a client-generated id unless it already has one
pub fn with_client_id(mut message: UserMessage) -> UserMessage {
    if message.id.is_none() {
        message.id = Some(uuid::Uuid::new_v4().to_string());
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskwire_api::{AssistantMessage, TaskId, ToolCallChunk, UsageChunk};

    fn reconciler() -> Reconciler {
        Reconciler::new(Task::new(TaskId(1)), Duration::ZERO)
    }

    fn text(content: &str) -> TaskEvent {
        TaskEvent::MessageChunk(MessageChunk::Text {
            content: content.into(),
        })
    }

    fn tool_chunk(index: usize, id: Option<&str>, name: Option<&str>, arguments: &str) -> TaskEvent {
        TaskEvent::MessageChunk(MessageChunk::ToolCall {
            data: ToolCallChunk {
                index,
                id: id.map(String::from),
                name: name.map(String::from),
                arguments: arguments.into(),
            },
        })
    }

    fn assistant(id: &str, content: &str) -> Message {
        Message::Assistant(AssistantMessage {
            id: Some(id.into()),
            content: Some(content.into()),
            ..Default::default()
        })
    }

    fn tool_message(value: serde_json::Value) -> ToolMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_streamed_text_is_finalized() {
        let now = Instant::now();
        let mut r = reconciler();

        r.apply(&TaskEvent::MessageStart { message_id: "m1".into() }, now);
        r.apply(&text("Hel"), now);
        r.apply(&text("lo"), now);
        assert_eq!(r.messages().last().unwrap().text(), "Hello");

        r.apply(&TaskEvent::MessageEnd { message: assistant("m1", "Hello") }, now);
        let last = r.messages().last().unwrap();
        assert_eq!(last.id(), Some("m1"));
        assert_eq!(last.text(), "Hello");
        assert_eq!(r.messages().len(), 1);
    }

    #[test]
    fn test_throttled_text_reaches_transcript_on_flush() {
        let start = Instant::now();
        let mut r = Reconciler::new(Task::new(TaskId(1)), Duration::from_millis(100));

        r.apply(&TaskEvent::MessageStart { message_id: "m1".into() }, start);
        r.apply(&text("a"), start);
        assert!(r.apply(&text("b"), start).is_empty());
        assert_eq!(r.messages()[0].text(), "a");

        let deadline = r.next_deadline().unwrap();
        assert_eq!(r.flush_due(deadline), vec![Change::Upserted { index: 0 }]);
        assert_eq!(r.messages()[0].text(), "ab");
    }

    #[test]
    fn test_message_end_is_idempotent() {
        let now = Instant::now();
        let mut r = reconciler();
        r.apply(&TaskEvent::MessageStart { message_id: "m1".into() }, now);

        let end = TaskEvent::MessageEnd { message: assistant("m1", "done") };
        r.apply(&end, now);
        let once = r.messages().to_vec();
        r.apply(&end, now);
        assert_eq!(r.messages(), once.as_slice());
    }

    #[test]
    fn test_message_end_unknown_id_leaves_transcript() {
        let now = Instant::now();
        let mut r = reconciler();
        r.apply(&TaskEvent::MessageStart { message_id: "m1".into() }, now);
        let before = r.messages().to_vec();

        let changes = r.apply(&TaskEvent::MessageEnd { message: assistant("zzz", "?") }, now);
        assert!(changes.is_empty());
        assert_eq!(r.messages(), before.as_slice());
    }

    #[test]
    fn test_text_without_provisional_message_is_skipped() {
        let now = Instant::now();
        let mut r = reconciler();
        r.append_user(UserMessage {
            id: Some("u1".into()),
            content: taskwire_api::MessageContent::Text("hi".into()),
        });

        assert!(r.apply(&text("stray"), now).is_empty());
        assert_eq!(r.messages()[0].text(), "hi");
    }

    #[test]
    fn test_tool_call_chunks_merge_into_one_message() {
        let now = Instant::now();
        let mut r = reconciler();
        r.apply(&TaskEvent::MessageStart { message_id: "m1".into() }, now);
        r.apply(&tool_chunk(0, Some("t1"), Some("search"), "{\"q\":"), now);
        r.apply(&tool_chunk(0, None, None, "\"cat\"}"), now);

        let tools: Vec<_> = r.messages().iter().filter_map(Message::as_tool).collect();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].tool_call_id, "t1");
        assert_eq!(tools[0].name, "search");
        assert_eq!(tools[0].arguments, "{\"q\":\"cat\"}");
        assert_eq!(tools[0].result, None);
        assert_eq!(tools[0].error, None);
    }

    #[test]
    fn test_tool_call_without_id_waits() {
        let now = Instant::now();
        let mut r = reconciler();
        assert!(r.apply(&tool_chunk(0, None, Some("search"), "{"), now).is_empty());
        assert!(r.messages().is_empty());

        r.apply(&tool_chunk(0, Some("t1"), None, "}"), now);
        let tool = r.messages()[0].as_tool().unwrap();
        assert_eq!(tool.name, "search");
        assert_eq!(tool.arguments, "{}");
    }

    #[test]
    fn test_tool_call_end_replaces_or_appends() {
        let now = Instant::now();
        let mut r = reconciler();
        r.apply(&tool_chunk(0, Some("t1"), Some("search"), "{}"), now);

        let end = tool_message(json!({
            "id": "msg-t1", "tool_call_id": "t1", "name": "search", "arguments": "{}",
            "result": null, "error": null, "metadata": {}
        }));
        r.apply(&TaskEvent::ToolCallEnd { message: end.clone() }, now);
        assert_eq!(r.messages().len(), 1);
        assert_eq!(r.messages()[0], Message::Tool(end));

        let other = tool_message(json!({"id": "msg-t2", "tool_call_id": "t2", "name": "ls"}));
        r.apply(&TaskEvent::ToolCallEnd { message: other }, now);
        assert_eq!(r.messages().len(), 2);
    }

    #[test]
    fn test_usage_is_shallow_merged() {
        let now = Instant::now();
        let mut r = reconciler();
        r.apply(
            &TaskEvent::MessageChunk(MessageChunk::Usage(UsageChunk {
                input_tokens: Some(5),
                max_tokens: Some(100),
                ..Default::default()
            })),
            now,
        );
        let changes = r.apply(
            &TaskEvent::MessageChunk(MessageChunk::Usage(UsageChunk {
                input_tokens: Some(8),
                output_tokens: Some(2),
                ..Default::default()
            })),
            now,
        );
        assert_eq!(changes, vec![Change::Usage]);
        assert_eq!(
            *r.usage(),
            TaskUsage {
                input_tokens: 8,
                output_tokens: 2,
                total_tokens: 0,
                max_tokens: 100
            }
        );
    }

    #[test]
    fn test_close_removes_orphans() {
        let now = Instant::now();
        let mut r = reconciler();
        r.append_user(UserMessage {
            id: None,
            content: taskwire_api::MessageContent::Text("go".into()),
        });
        r.apply(&TaskEvent::MessageStart { message_id: "m1".into() }, now);
        r.apply(&tool_chunk(0, Some("t1"), Some("search"), "{}"), now);
        assert_eq!(r.messages().len(), 3);

        assert_eq!(r.close(), vec![Change::Pruned { removed: 1 }]);
        assert_eq!(r.messages().len(), 2);
        assert!(r.messages().iter().all(|m| m.id().is_some()));
        assert!(r.close().is_empty());
    }

    #[test]
    fn test_tool_executed_and_permission() {
        let now = Instant::now();
        let mut r = reconciler();
        r.apply(&tool_chunk(0, Some("t1"), Some("rm"), "{}"), now);

        let changes = r.apply(&TaskEvent::ToolRequirePermission { tool_call_id: "t1".into() }, now);
        assert_eq!(
            changes,
            vec![
                Change::Upserted { index: 0 },
                Change::PermissionRequired { tool_call_id: "t1".into() }
            ]
        );
        let tool = r.messages()[0].as_tool().unwrap();
        assert_eq!(tool.metadata.user_approval, Some(UserApprovalStatus::Pending));

        r.apply(
            &TaskEvent::ToolExecuted {
                tool_call_id: "t1".into(),
                result: Some("ok".into()),
            },
            now,
        );
        assert_eq!(r.messages()[0].text(), "ok");

        let missing = r.apply(
            &TaskEvent::ToolExecuted {
                tool_call_id: "nope".into(),
                result: None,
            },
            now,
        );
        assert!(missing.is_empty());
    }

    #[test]
    fn test_review_is_confirmed_by_server_message() {
        let now = Instant::now();
        let mut r = reconciler();
        r.apply(&tool_chunk(0, Some("t1"), Some("rm"), "{}"), now);

        r.request_review("t1", ReviewStatus::Approved);
        assert_eq!(
            r.approval("t1"),
            Some(Approval::Requested(UserApprovalStatus::Approved))
        );
        assert_eq!(
            r.messages()[0].as_tool().unwrap().metadata.user_approval,
            Some(UserApprovalStatus::Approved)
        );

        let confirmed = tool_message(json!({
            "id": "msg-t1", "tool_call_id": "t1", "name": "rm",
            "metadata": {"user_approval": "approved"}
        }));
        r.apply(&TaskEvent::ToolCallEnd { message: confirmed }, now);
        assert_eq!(
            r.approval("t1"),
            Some(Approval::Confirmed(UserApprovalStatus::Approved))
        );
    }

    #[test]
    fn test_server_message_overwrites_optimistic_review() {
        let now = Instant::now();
        let mut r = reconciler();
        r.apply(
            &TaskEvent::ToolCallEnd {
                message: tool_message(json!({"id": "x1", "tool_call_id": "t1", "name": "rm"})),
            },
            now,
        );
        r.request_review("t1", ReviewStatus::Approved);

        let corrected = tool_message(json!({
            "id": "x1", "tool_call_id": "t1", "name": "rm",
            "metadata": {"user_approval": "denied"}
        }));
        r.apply(
            &TaskEvent::MessageReplace {
                message: Message::Tool(corrected),
            },
            now,
        );
        assert_eq!(
            r.messages()[0].as_tool().unwrap().metadata.user_approval,
            Some(UserApprovalStatus::Denied)
        );
        assert_eq!(r.approval("t1").map(Approval::status), Some(UserApprovalStatus::Denied));
    }

    #[test]
    fn test_append_user_assigns_client_id() {
        let mut r = reconciler();
        let (message, change) = r.append_user(UserMessage {
            id: None,
            content: taskwire_api::MessageContent::Text("hi".into()),
        });
        assert!(message.id.is_some());
        assert_eq!(change, Change::Upserted { index: 0 });
        assert_eq!(r.messages()[0].id(), message.id.as_deref());
    }

    #[test]
    fn test_client_id_is_kept_when_present() {
        let message = with_client_id(UserMessage {
            id: Some("u7".into()),
            content: taskwire_api::MessageContent::Text("hi".into()),
        });
        assert_eq!(message.id.as_deref(), Some("u7"));
    }
}

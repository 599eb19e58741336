//! Task endpoints and the HTTP client for one-shot task requests

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::transport::StreamRequest;
use crate::types::{AgentId, ReviewStatus, Task, TaskId, UserMessage};

/// An action that opens a task stream
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOperation {
    /// Run the agent, optionally with a new user message
    Continue { message: Option<UserMessage> },
    /// Answer a tool that asked the user a question
    ToolAnswer { tool_call_id: String, answer: String },
    /// Approve or deny a tool call awaiting permission
    ToolReview {
        tool_call_id: String,
        status: ReviewStatus,
        auto_approve: bool,
    },
}

impl TaskOperation {
    fn path(&self) -> &'static str {
        match self {
            TaskOperation::Continue { .. } => "continue",
            TaskOperation::ToolAnswer { .. } => "tool_answer",
            TaskOperation::ToolReview { .. } => "tool_reviews",
        }
    }
}

/// A user message as the server expects it in a request body
#[derive(Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
enum OutgoingMessage<'a> {
    User(&'a UserMessage),
}

#[derive(Serialize)]
struct ContinueBody<'a> {
    agent_id: AgentId,
    message: Option<OutgoingMessage<'a>>,
}

#[derive(Serialize)]
struct ToolAnswerBody<'a> {
    agent_id: AgentId,
    tool_call_id: &'a str,
    answer: &'a str,
}

#[derive(Serialize)]
struct ToolReviewBody<'a> {
    agent_id: AgentId,
    tool_call_id: &'a str,
    status: ReviewStatus,
    auto_approve: bool,
}

/// URL layout of the task server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base_url: String,
}

impl Endpoints {
    /// Create endpoints rooted at `base_url` (e.g. `http://localhost:8000/api`)
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let trimmed = base_url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "base URL must start with http:// or https://, got `{}`",
                base_url
            )));
        }
        Ok(Self {
            base_url: trimmed.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of a task resource
    pub fn task_url(&self, task_id: TaskId) -> String {
        format!("{}/tasks/{}", self.base_url, task_id)
    }

    /// Build the stream request for an operation on a task
    pub fn stream_request(
        &self,
        task_id: TaskId,
        agent_id: AgentId,
        operation: &TaskOperation,
    ) -> Result<StreamRequest> {
        let body = match operation {
            TaskOperation::Continue { message } => serde_json::to_value(ContinueBody {
                agent_id,
                message: message.as_ref().map(OutgoingMessage::User),
            })?,
            TaskOperation::ToolAnswer {
                tool_call_id,
                answer,
            } => serde_json::to_value(ToolAnswerBody {
                agent_id,
                tool_call_id,
                answer,
            })?,
            TaskOperation::ToolReview {
                tool_call_id,
                status,
                auto_approve,
            } => serde_json::to_value(ToolReviewBody {
                agent_id,
                tool_call_id,
                status: *status,
                auto_approve: *auto_approve,
            })?,
        };

        Ok(StreamRequest {
            url: format!("{}/{}", self.task_url(task_id), operation.path()),
            body,
        })
    }
}

/// Source of task snapshots
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Fetch a task with its full transcript
    async fn fetch_task(&self, task_id: TaskId) -> Result<Task>;
}

/// HTTP client for the task server's plain JSON endpoints
#[derive(Debug, Clone)]
pub struct TaskClient {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl TaskClient {
    pub fn new(endpoints: Endpoints) -> Self {
        Self::with_client(endpoints, reqwest::Client::new())
    }

    /// Share an HTTP client, e.g. one with default headers
    pub fn with_client(endpoints: Endpoints, http: reqwest::Client) -> Self {
        Self { http, endpoints }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

#[async_trait]
impl TaskSource for TaskClient {
    async fn fetch_task(&self, task_id: TaskId) -> Result<Task> {
        let url = self.endpoints.task_url(task_id);
        tracing::debug!(%url, "fetching task");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_failed_response(status, &body));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageContent;
    use serde_json::json;

    fn endpoints() -> Endpoints {
        Endpoints::new("http://localhost:8000/api/").unwrap()
    }

    #[test]
    fn test_base_url_is_normalized() {
        assert_eq!(endpoints().base_url(), "http://localhost:8000/api");
        assert_eq!(
            endpoints().task_url(TaskId(42)),
            "http://localhost:8000/api/tasks/42"
        );
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let err = Endpoints::new("localhost:8000").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_continue_request_with_message() {
        let message = UserMessage {
            id: Some("u1".into()),
            content: MessageContent::Text("hello".into()),
        };
        let request = endpoints()
            .stream_request(
                TaskId(1),
                AgentId(3),
                &TaskOperation::Continue {
                    message: Some(message),
                },
            )
            .unwrap();

        assert_eq!(request.url, "http://localhost:8000/api/tasks/1/continue");
        assert_eq!(
            request.body,
            json!({"agent_id": 3, "message": {"role": "user", "id": "u1", "content": "hello"}})
        );
    }

    #[test]
    fn test_continue_request_without_message() {
        let request = endpoints()
            .stream_request(TaskId(1), AgentId(3), &TaskOperation::Continue { message: None })
            .unwrap();
        assert_eq!(request.body, json!({"agent_id": 3, "message": null}));
    }

    #[test]
    fn test_tool_answer_request() {
        let request = endpoints()
            .stream_request(
                TaskId(5),
                AgentId(2),
                &TaskOperation::ToolAnswer {
                    tool_call_id: "call-1".into(),
                    answer: "blue".into(),
                },
            )
            .unwrap();
        assert_eq!(request.url, "http://localhost:8000/api/tasks/5/tool_answer");
        assert_eq!(
            request.body,
            json!({"agent_id": 2, "tool_call_id": "call-1", "answer": "blue"})
        );
    }

    #[test]
    fn test_tool_review_request() {
        let request = endpoints()
            .stream_request(
                TaskId(5),
                AgentId(2),
                &TaskOperation::ToolReview {
                    tool_call_id: "call-2".into(),
                    status: ReviewStatus::Approved,
                    auto_approve: true,
                },
            )
            .unwrap();
        assert_eq!(request.url, "http://localhost:8000/api/tasks/5/tool_reviews");
        assert_eq!(
            request.body,
            json!({"agent_id": 2, "tool_call_id": "call-2", "status": "approved", "auto_approve": true})
        );
    }
}

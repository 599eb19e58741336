//! Task session: gates user actions and drives one stream at a time

use std::sync::Arc;
use std::time::Duration;

use taskwire_api::{
    AgentId, CancelHandle, Endpoints, Envelope, EventSink, Message, ReviewStatus, StreamId, Task,
    TaskEvent, TaskId, TaskOperation, TaskSource, TaskUsage, Transport, TransportEvent,
    UserMessage,
};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, sleep_until};

use crate::{
    error::{DispatchError, Error, Result},
    events::SessionUpdate,
    reconciler::{self, Approval, Change, Reconciler},
    state::{self, Action, SessionState, Signal},
};

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Minimum spacing between transcript updates for streamed deltas
    pub throttle_interval: Duration,
    /// Capacity of the update broadcast channel
    pub update_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            throttle_interval: Duration::from_millis(100),
            update_capacity: 256,
        }
    }
}

struct ActiveStream {
    id: StreamId,
    cancel: CancelHandle,
}

enum Wake {
    Envelope(Envelope),
    Deadline,
}

/// A streamed agent task and the user actions allowed on it.
///
/// Actions are synchronous and never block. With [`taskwire_api::SseTransport`]
/// they should be called inside a tokio runtime; outside one the opened stream
/// fails right away and the session moves to `Error`.
pub struct TaskSession {
    endpoints: Endpoints,
    transport: Arc<dyn Transport>,
    reconciler: Reconciler,
    state: SessionState,
    agent_id: Option<AgentId>,
    active: Option<ActiveStream>,
    next_stream: StreamId,
    last_error: Option<String>,
    inbox_tx: mpsc::UnboundedSender<Envelope>,
    inbox_rx: mpsc::UnboundedReceiver<Envelope>,
    update_tx: broadcast::Sender<SessionUpdate>,
}

impl TaskSession {
    /// Create a session for an already fetched task
    pub fn new(
        task: Task,
        endpoints: Endpoints,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (update_tx, _) = broadcast::channel(config.update_capacity.max(1));
        Self {
            endpoints,
            transport,
            agent_id: task.agent_id,
            reconciler: Reconciler::new(task, config.throttle_interval),
            state: SessionState::Idle,
            active: None,
            next_stream: 0,
            last_error: None,
            inbox_tx,
            inbox_rx,
            update_tx,
        }
    }

    /// Fetch a task and create a session for it
    pub async fn load(
        source: &dyn TaskSource,
        task_id: TaskId,
        endpoints: Endpoints,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Result<Self> {
        let task = source.fetch_task(task_id).await?;
        tracing::debug!(task = %task.id, messages = task.messages.len(), "loaded task");
        Ok(Self::new(task, endpoints, transport, config))
    }

    /// Subscribe to session updates
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.update_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn task(&self) -> &Task {
        self.reconciler.task()
    }

    pub fn messages(&self) -> &[Message] {
        self.reconciler.messages()
    }

    pub fn usage(&self) -> &TaskUsage {
        self.reconciler.usage()
    }

    pub fn agent_id(&self) -> Option<AgentId> {
        self.agent_id
    }

    /// Message of the last failure, cleared by the next dispatch
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Review state of a tool call the user has reviewed
    pub fn approval(&self, tool_call_id: &str) -> Option<Approval> {
        self.reconciler.approval(tool_call_id)
    }

    /// Whether a stream is open
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Whether `step` has nothing left to wait for
    pub fn is_settled(&self) -> bool {
        self.active.is_none() && self.reconciler.next_deadline().is_none()
    }

    /// Select the agent that runs the task
    pub fn set_agent(&mut self, agent_id: AgentId) {
        self.agent_id = Some(agent_id);
    }

    /// Run the agent, optionally appending a new user message first.
    ///
    /// Also the retry action after a failure.
    pub fn continue_task(&mut self, message: Option<UserMessage>) -> Result<()> {
        let agent_id = self.admit(Action::Continue)?;
        // The same id goes to the server and into the transcript
        let message = message.map(reconciler::with_client_id);
        let request = self.endpoints.stream_request(
            self.task().id,
            agent_id,
            &TaskOperation::Continue {
                message: message.clone(),
            },
        )?;

        self.supersede();
        if let Some(message) = message {
            let (_, change) = self.reconciler.append_user(message);
            self.publish(vec![change]);
        }
        self.open(request);
        Ok(())
    }

    /// Answer a tool that asked the user a question
    pub fn answer_tool(
        &mut self,
        tool_call_id: impl Into<String>,
        answer: impl Into<String>,
    ) -> Result<()> {
        let agent_id = self.admit(Action::AnswerTool)?;
        let request = self.endpoints.stream_request(
            self.task().id,
            agent_id,
            &TaskOperation::ToolAnswer {
                tool_call_id: tool_call_id.into(),
                answer: answer.into(),
            },
        )?;

        self.supersede();
        self.open(request);
        Ok(())
    }

    /// Approve or deny a tool call awaiting permission
    pub fn review_tool(
        &mut self,
        tool_call_id: impl Into<String>,
        status: ReviewStatus,
        auto_approve: bool,
    ) -> Result<()> {
        let agent_id = self.admit(Action::ReviewTool)?;
        let tool_call_id = tool_call_id.into();
        let request = self.endpoints.stream_request(
            self.task().id,
            agent_id,
            &TaskOperation::ToolReview {
                tool_call_id: tool_call_id.clone(),
                status,
                auto_approve,
            },
        )?;

        self.supersede();
        let change = self.reconciler.request_review(&tool_call_id, status);
        self.publish(change.into_iter().collect());
        self.open(request);
        Ok(())
    }

    /// Abort the active stream and return to idle right away
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::info!(stream = active.id, "cancelling stream");
            active.cancel.cancel();
        }
        self.reconciler.clear_buffers();
        self.apply_signal(Signal::Cancelled);
    }

    /// Process one transport event
    pub fn handle(&mut self, envelope: Envelope) {
        let Some(active) = &self.active else {
            tracing::debug!(stream = envelope.stream, "dropping event, no active stream");
            return;
        };
        if envelope.stream != active.id {
            tracing::debug!(
                stream = envelope.stream,
                active = active.id,
                "dropping event from superseded stream"
            );
            return;
        }

        match envelope.event {
            TransportEvent::Connect => tracing::debug!(stream = envelope.stream, "stream connected"),
            TransportEvent::Message { event, data } => match TaskEvent::decode(&event, data) {
                Ok(event) => self.apply_event(event),
                Err(e) => {
                    tracing::warn!("{}", e);
                    self.notify(e.to_string());
                }
            },
            TransportEvent::DecodeFailed { event, message } => {
                tracing::warn!(event = %event, "{}", message);
                self.notify(message);
            }
            TransportEvent::Error { message } => {
                self.active = None;
                self.fail(message);
            }
            TransportEvent::Close => {
                tracing::debug!(stream = envelope.stream, "stream closed");
                self.active = None;
                self.close_stream();
            }
        }
    }

    /// Deliver throttled transcript updates that are due
    pub fn flush_due(&mut self, now: Instant) {
        let changes = self.reconciler.flush_due(now);
        self.publish(changes);
    }

    /// Process every event already queued, without waiting
    pub fn drain(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(envelope) = self.inbox_rx.try_recv() {
            self.handle(envelope);
            processed += 1;
        }
        processed
    }

    /// Wait for the next event or throttle deadline and process it.
    ///
    /// Returns `false` when there is nothing left to wait for.
    pub async fn step(&mut self) -> bool {
        if self.is_settled() {
            return false;
        }
        let deadline = self.reconciler.next_deadline();

        let wake = tokio::select! {
            envelope = self.inbox_rx.recv() => match envelope {
                Some(envelope) => Wake::Envelope(envelope),
                None => return false,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => Wake::Deadline,
        };

        match wake {
            Wake::Envelope(envelope) => self.handle(envelope),
            Wake::Deadline => self.flush_due(Instant::now()),
        }
        true
    }

    /// Drive the active stream until it ends and pending updates are flushed
    pub async fn run_until_settled(&mut self) {
        while self.step().await {}
    }

    fn admit(&self, action: Action) -> Result<AgentId> {
        let checked = match self.agent_id {
            None => Err(DispatchError::NoAgentSelected),
            Some(agent_id) => state::check(self.state, action).map(|_| agent_id),
        };
        checked.map_err(|e| {
            tracing::debug!(?action, state = %self.state, "refused: {}", e);
            self.notify(e.to_string());
            Error::from(e)
        })
    }

    fn supersede(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::info!(stream = active.id, "superseding stream");
            active.cancel.cancel();
        }
        self.reconciler.clear_buffers();
    }

    fn open(&mut self, request: taskwire_api::StreamRequest) {
        self.next_stream += 1;
        let id = self.next_stream;
        self.last_error = None;
        self.apply_signal(Signal::Dispatched);

        tracing::debug!(stream = id, url = %request.url, "dispatching");
        let sink = EventSink::new(id, self.inbox_tx.clone());
        let cancel = self.transport.open(request, sink);
        self.active = Some(ActiveStream { id, cancel });
    }

    fn apply_event(&mut self, event: TaskEvent) {
        if let TaskEvent::Unknown { event } = &event {
            tracing::debug!("ignoring unknown event: {}", event);
            return;
        }

        let changes = self.reconciler.apply(&event, Instant::now());
        self.publish(changes);

        match event {
            TaskEvent::MessageStart { .. } => self.apply_signal(Signal::MessageStarted),
            TaskEvent::Error { message } => self.fail(message),
            TaskEvent::TaskDone => self.finish(false),
            TaskEvent::TaskInterrupted => self.finish(true),
            _ => {}
        }
    }

    fn fail(&mut self, message: String) {
        tracing::warn!("task stream failed: {}", message);
        self.reconciler.clear_buffers();
        self.last_error = Some(message.clone());
        self.apply_signal(Signal::Failed);
        self.emit(SessionUpdate::Failed { message });
    }

    fn finish(&mut self, interrupted: bool) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
        self.close_stream();
        self.emit(SessionUpdate::Finished { interrupted });
    }

    fn close_stream(&mut self) {
        let changes = self.reconciler.close();
        self.publish(changes);
        self.apply_signal(Signal::StreamClosed);
    }

    fn apply_signal(&mut self, signal: Signal) {
        let next = state::transition(self.state, signal);
        if next != self.state {
            tracing::debug!(from = %self.state, to = %next, ?signal, "state changed");
            let from = std::mem::replace(&mut self.state, next);
            self.emit(SessionUpdate::StateChanged { from, to: next });
        }
    }

    fn publish(&self, changes: Vec<Change>) {
        for change in changes {
            let update = match change {
                Change::Upserted { index } => match self.messages().get(index) {
                    Some(message) => SessionUpdate::MessageUpserted {
                        index,
                        message: message.clone(),
                    },
                    None => continue,
                },
                Change::Pruned { removed } => SessionUpdate::Pruned { removed },
                Change::Usage => SessionUpdate::Usage {
                    usage: self.usage().clone(),
                },
                Change::PermissionRequired { tool_call_id } => {
                    SessionUpdate::PermissionRequired { tool_call_id }
                }
                Change::UserResponseRequired { tool_name } => {
                    SessionUpdate::UserResponseRequired { tool_name }
                }
            };
            self.emit(update);
        }
    }

    fn notify(&self, message: String) {
        self.emit(SessionUpdate::Notice { message });
    }

    fn emit(&self, update: SessionUpdate) {
        let _ = self.update_tx.send(update);
    }
}

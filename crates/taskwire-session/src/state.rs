//! Session state machine
//!
//! `transition` is pure: given a state and a signal it returns the next state
//! without touching the transcript or the transport. Action gating lives in
//! `check`, which the gateway consults before doing anything else.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Coarse lifecycle of a task session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Nothing in flight; every action is allowed
    #[default]
    Idle,
    /// A request was sent and no assistant message has started yet
    Waiting,
    /// An assistant message is streaming
    Running,
    /// The last stream failed
    Error,
}

impl SessionState {
    /// Whether a stream is in flight
    pub fn is_busy(self) -> bool {
        matches!(self, SessionState::Waiting | SessionState::Running)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Waiting => "waiting",
            SessionState::Running => "running",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// User actions the gateway accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    AnswerTool,
    ReviewTool,
    Cancel,
}

/// Inputs that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// A request was dispatched and a stream opened
    Dispatched,
    /// The server started an assistant message
    MessageStarted,
    /// The stream finished normally
    StreamClosed,
    /// The transport failed or the server reported an error
    Failed,
    /// The user cancelled
    Cancelled,
}

/// Compute the next state
pub fn transition(state: SessionState, signal: Signal) -> SessionState {
    use SessionState::*;

    match (state, signal) {
        (_, Signal::Cancelled) => Idle,

        (Idle | Error, Signal::Dispatched) => Waiting,

        (Waiting | Running, Signal::MessageStarted) => Running,
        (Waiting | Running, Signal::StreamClosed) => Idle,
        (Waiting | Running, Signal::Failed) => Error,

        // Late or out-of-order signals leave the state as is
        (state, _) => state,
    }
}

/// Check whether `action` may be taken in `state`
pub fn check(state: SessionState, action: Action) -> Result<(), DispatchError> {
    match (state, action) {
        (_, Action::Cancel) => Ok(()),
        (SessionState::Idle, _) => Ok(()),
        (SessionState::Error, Action::Continue) => Ok(()),
        (SessionState::Error, _) => Err(DispatchError::RetryRequired),
        (busy @ (SessionState::Waiting | SessionState::Running), _) => {
            Err(DispatchError::Busy(busy))
        }
    }
}

/// Whether `action` may be taken in `state`
pub fn permits(state: SessionState, action: Action) -> bool {
    check(state, action).is_ok()
}

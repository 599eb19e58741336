//! Session update types

use serde::{Deserialize, Serialize};
use taskwire_api::{Message, TaskUsage};

use crate::state::SessionState;

/// Updates broadcast to session observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// The session moved to a new state
    StateChanged {
        from: SessionState,
        to: SessionState,
    },

    /// A transcript entry was appended or changed in place
    MessageUpserted { index: usize, message: Message },

    /// Messages without a stable id were dropped from the transcript
    Pruned { removed: usize },

    /// The task's usage snapshot changed
    Usage { usage: TaskUsage },

    /// A tool call waits for the user's approval
    PermissionRequired { tool_call_id: String },

    /// A tool waits for the user's answer
    UserResponseRequired { tool_name: String },

    /// The server finished the task
    Finished { interrupted: bool },

    /// The stream failed; `continue_task` retries
    Failed { message: String },

    /// Informational message for the user
    Notice { message: String },
}

impl SessionUpdate {
    /// Check if this update ends a stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionUpdate::Finished { .. } | SessionUpdate::Failed { .. }
        )
    }
}

//! Error types for taskwire-session

use thiserror::Error;

use crate::state::SessionState;

/// Result type alias using taskwire-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a user action is refused before anything is sent
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// No agent is selected for the task
    #[error("Select an agent before continuing the task")]
    NoAgentSelected,

    /// A stream is in flight; only cancel is allowed
    #[error("The task is busy ({0}); cancel it first")]
    Busy(SessionState),

    /// The last stream failed; only a retry or cancel is allowed
    #[error("The last run failed; retry or cancel first")]
    RetryRequired,
}

/// Errors that can occur during session operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the wire layer
    #[error(transparent)]
    Api(#[from] taskwire_api::Error),

    /// The action was refused
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl Error {
    /// Check if this error is a refused action rather than a failure
    pub fn is_dispatch(&self) -> bool {
        matches!(self, Error::Dispatch(_))
    }
}

//! Error types for taskwire-api

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Result type alias using taskwire-api Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the task server
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered with a non-success status
    #[error("{message}")]
    Api { status: u16, message: String },

    /// A single event payload could not be decoded
    #[error("Failed to decode `{event}` event: {reason}")]
    Decode { event: String, reason: String },

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a decode error for a named event
    pub fn decode(event: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            event: event.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an API error from a failed response's status and raw body.
    pub fn from_failed_response(status: StatusCode, body: &str) -> Self {
        Self::api(status.as_u16(), failure_message(status, body))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Derive the user-facing message for a non-2xx response.
///
/// A JSON body of the shape `{"error": "..."}` wins. A JSON body without that
/// field yields `HTTP_<status>`. A body that is not JSON at all falls back to
/// the status text, then to `HTTP_<status>`.
pub fn failure_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error: Some(message) }) => message,
        Ok(ErrorBody { error: None }) => format!("HTTP_{}", status.as_u16()),
        Err(_) => match status.canonical_reason() {
            Some(reason) if !reason.is_empty() => reason.to_string(),
            _ => format!("HTTP_{}", status.as_u16()),
        },
    }
}

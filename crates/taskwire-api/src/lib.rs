//! taskwire-api: wire layer for streamed agent tasks
//!
//! This crate provides the task data model, the decoding of task stream events,
//! the server-sent events transport, and the task server's endpoints.

pub mod client;
pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use client::{Endpoints, TaskClient, TaskOperation, TaskSource};
pub use error::{Error, Result};
pub use events::{MessageChunk, TaskEvent, UsageChunk};
pub use transport::{
    CancelHandle, Envelope, EventSink, SseTransport, StreamId, StreamRequest, Transport,
    TransportEvent,
};
pub use types::*;

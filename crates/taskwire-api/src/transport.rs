//! Event transport: one outbound request yielding a sequence of named JSON events

use std::pin::Pin;

use async_stream::stream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest_eventsource::{Event, EventSource, retry::Never};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::failure_message;

/// Identifies one opened stream so late events from a superseded stream can be told apart
pub type StreamId = u64;

/// Events delivered by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The server accepted the request (2xx)
    Connect,
    /// A named event with its JSON payload (`Null` for an empty payload)
    Message { event: String, data: Value },
    /// One event's payload was not valid JSON; the stream keeps going
    DecodeFailed { event: String, message: String },
    /// The request failed or the connection broke; nothing follows
    Error { message: String },
    /// The server finished the stream; nothing follows
    Close,
}

impl TransportEvent {
    /// Check if nothing can follow this event
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportEvent::Error { .. } | TransportEvent::Close)
    }
}

/// A transport event tagged with the stream it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub stream: StreamId,
    pub event: TransportEvent,
}

/// Where a transport delivers its events
#[derive(Debug, Clone)]
pub struct EventSink {
    stream: StreamId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSink {
    /// Create a sink that tags every event with `stream`
    pub fn new(stream: StreamId, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { stream, tx }
    }

    /// The stream id this sink tags events with
    pub fn stream_id(&self) -> StreamId {
        self.stream
    }

    /// Deliver an event. Returns `false` once the receiving side is gone.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Envelope {
                stream: self.stream,
                event,
            })
            .is_ok()
    }
}

/// Handle for aborting an opened stream.
///
/// Cancelling is idempotent, and a cancelled transport delivers nothing more.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Create a fresh, uncancelled handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the stream
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The underlying token, for transports that select on it
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// A request that opens an event stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    /// Absolute endpoint URL
    pub url: String,
    /// JSON body, sent with `POST`
    pub body: Value,
}

/// A stream of transport events
pub type TransportEventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Opens event streams
pub trait Transport: Send + Sync {
    /// Open exactly one request and deliver its events to `sink`.
    ///
    /// Must not block. A transport that cannot start the request reports it
    /// through `sink` as [`TransportEvent::Error`].
    fn open(&self, request: StreamRequest, sink: EventSink) -> CancelHandle;
}

/// Server-sent events transport over HTTP
pub struct SseTransport {
    client: reqwest::Client,
    headers: HeaderMap,
}

impl SseTransport {
    /// Create a transport with a default HTTP client
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Create a transport that shares an existing HTTP client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            headers: HeaderMap::new(),
        }
    }

    /// Send extra headers with every stream request
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

impl Default for SseTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SseTransport {
    /// Spawns the request on the current tokio runtime. Without one, the
    /// sink receives an error instead.
    fn open(&self, request: StreamRequest, sink: EventSink) -> CancelHandle {
        let handle = CancelHandle::new();
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!("cannot open event stream: {}", e);
                sink.send(TransportEvent::Error {
                    message: format!("No async runtime to run the stream: {}", e),
                });
                return handle;
            }
        };

        let request_builder = self
            .client
            .post(&request.url)
            .headers(self.headers.clone())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .json(&request.body);

        match EventSource::new(request_builder) {
            Ok(mut event_source) => {
                event_source.set_retry_policy(Box::new(Never));
                tracing::debug!(stream = sink.stream_id(), url = %request.url, "opening event stream");
                runtime.spawn(forward(create_stream(event_source), sink, handle.token()));
            }
            Err(e) => {
                sink.send(TransportEvent::Error {
                    message: format!("Failed to create event source: {}", e),
                });
            }
        }

        handle
    }
}

/// Pump events into the sink until the stream ends, the receiver is dropped,
/// or the token is cancelled. Dropping the stream closes the connection.
async fn forward(mut events: TransportEventStream, sink: EventSink, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(stream = sink.stream_id(), "event stream cancelled");
                return;
            }
            next = events.next() => {
                let Some(event) = next else {
                    return;
                };
                let terminal = event.is_terminal();
                if !sink.send(event) || terminal {
                    return;
                }
            }
        }
    }
}

fn create_stream(mut event_source: EventSource) -> TransportEventStream {
    Box::pin(stream! {
        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => yield TransportEvent::Connect,
                Ok(Event::Message(msg)) => yield decode_payload(msg.event, &msg.data),
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    event_source.close();
                    yield TransportEvent::Close;
                    return;
                }
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    event_source.close();
                    let body = response.text().await.unwrap_or_default();
                    yield TransportEvent::Error {
                        message: failure_message(status, &body),
                    };
                    return;
                }
                Err(e) => {
                    event_source.close();
                    tracing::warn!("SSE connection error: {}", e);
                    yield TransportEvent::Error {
                        message: format!("SSE connection error: {}", e),
                    };
                    return;
                }
            }
        }
        yield TransportEvent::Close;
    })
}

/// Parse one event payload. Empty payloads decode to `Null`; malformed ones are
/// reported without ending the stream.
pub fn decode_payload(event: String, data: &str) -> TransportEvent {
    if data.is_empty() {
        return TransportEvent::Message {
            event,
            data: Value::Null,
        };
    }

    match serde_json::from_str(data) {
        Ok(data) => TransportEvent::Message { event, data },
        Err(e) => {
            tracing::warn!(
                "Failed to parse SSE message\nmessage type: {}\nmessage data: {}\n{}",
                event,
                data,
                e
            );
            TransportEvent::DecodeFailed {
                event,
                message: format!("Failed to parse SSE message: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_payload_is_null() {
        assert_eq!(
            decode_payload("TASK_DONE".into(), ""),
            TransportEvent::Message {
                event: "TASK_DONE".into(),
                data: Value::Null
            }
        );
    }

    #[test]
    fn test_valid_payload_is_parsed() {
        assert_eq!(
            decode_payload("MESSAGE_START".into(), r#"{"message_id":"m1"}"#),
            TransportEvent::Message {
                event: "MESSAGE_START".into(),
                data: json!({"message_id": "m1"})
            }
        );
    }

    #[test]
    fn test_malformed_payload_is_reported() {
        let event = decode_payload("MESSAGE_CHUNK".into(), r#"{"type":"text","#);
        assert!(matches!(event, TransportEvent::DecodeFailed { ref event, .. } if event == "MESSAGE_CHUNK"));
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_cancel_handle_is_idempotent() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_cancelled());
        handle.cancel();
        clone.cancel();
        assert!(handle.is_cancelled());
        assert!(clone.token().is_cancelled());
    }

    #[test]
    fn test_open_without_runtime_reports_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = StreamRequest {
            url: "http://localhost:8000/api/tasks/1/continue".into(),
            body: json!({"agent_id": 1, "message": null}),
        };
        let handle = SseTransport::new().open(request, EventSink::new(3, tx));

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.stream, 3);
        assert!(matches!(envelope.event, TransportEvent::Error { .. }));
        assert!(rx.try_recv().is_err());
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_sink_tags_stream_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(7, tx);
        assert!(sink.send(TransportEvent::Connect));
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.stream, 7);
        assert_eq!(envelope.event, TransportEvent::Connect);

        drop(rx);
        assert!(!sink.send(TransportEvent::Close));
    }

    #[tokio::test]
    async fn test_forward_stops_on_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(1, tx);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let events: TransportEventStream = Box::pin(stream! {
            yield TransportEvent::Connect;
            yield TransportEvent::Close;
        });
        forward(events, sink, cancel).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forward_stops_after_terminal_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(1, tx);

        let events: TransportEventStream = Box::pin(stream! {
            yield TransportEvent::Connect;
            yield TransportEvent::Error { message: "gone".into() };
            yield TransportEvent::Close;
        });
        forward(events, sink, CancellationToken::new()).await;

        assert_eq!(rx.recv().await.unwrap().event, TransportEvent::Connect);
        assert_eq!(
            rx.recv().await.unwrap().event,
            TransportEvent::Error {
                message: "gone".into()
            }
        );
        assert!(rx.try_recv().is_err());
    }
}

use std::time::Duration;

use serde_json::json;
use taskwire_api::{
    AgentId, Endpoints, EventSink, SseTransport, TaskId, TaskOperation, Transport,
    TransportEvent,
};
use tokio::sync::mpsc;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(events: &[(&str, &str)]) -> String {
    events
        .iter()
        .map(|(name, data)| format!("event: {}\ndata: {}\n\n", name, data))
        .collect()
}

async fn collect(rx: &mut mpsc::UnboundedReceiver<taskwire_api::Envelope>) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(envelope)) => {
                assert_eq!(envelope.stream, 1);
                let terminal = envelope.event.is_terminal();
                events.push(envelope.event);
                if terminal {
                    break;
                }
            }
            Ok(None) | Err(_) => break,
        }
    }
    events
}

fn continue_request(server: &MockServer) -> taskwire_api::StreamRequest {
    Endpoints::new(server.uri())
        .unwrap()
        .stream_request(TaskId(1), AgentId(9), &TaskOperation::Continue { message: None })
        .unwrap()
}

#[tokio::test]
async fn test_stream_delivers_connect_messages_and_single_close() {
    let server = MockServer::start().await;
    let body = sse(&[
        ("MESSAGE_START", r#"{"message_id":"m1"}"#),
        ("MESSAGE_CHUNK", r#"{"type":"text","content":"Hi"}"#),
        ("TASK_DONE", "{}"),
    ]);
    Mock::given(method("POST"))
        .and(path("/tasks/1/continue"))
        .and(body_json(json!({"agent_id": 9, "message": null})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = SseTransport::new().open(continue_request(&server), EventSink::new(1, tx));
    let events = collect(&mut rx).await;

    assert_eq!(
        events,
        vec![
            TransportEvent::Connect,
            TransportEvent::Message {
                event: "MESSAGE_START".into(),
                data: json!({"message_id": "m1"})
            },
            TransportEvent::Message {
                event: "MESSAGE_CHUNK".into(),
                data: json!({"type": "text", "content": "Hi"})
            },
            TransportEvent::Message {
                event: "TASK_DONE".into(),
                data: json!({})
            },
            TransportEvent::Close,
        ]
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_malformed_event_does_not_end_stream() {
    let server = MockServer::start().await;
    let body = sse(&[
        ("MESSAGE_CHUNK", r#"{"type":"text","#),
        ("MESSAGE_CHUNK", r#"{"type":"text","content":"ok"}"#),
    ]);
    Mock::given(method("POST"))
        .and(path("/tasks/1/continue"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = SseTransport::new().open(continue_request(&server), EventSink::new(1, tx));
    let events = collect(&mut rx).await;

    assert_eq!(events.len(), 4);
    assert!(matches!(events[1], TransportEvent::DecodeFailed { .. }));
    assert_eq!(
        events[2],
        TransportEvent::Message {
            event: "MESSAGE_CHUNK".into(),
            data: json!({"type": "text", "content": "ok"})
        }
    );
    assert_eq!(events[3], TransportEvent::Close);
}

#[tokio::test]
async fn test_rejected_request_reports_error_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks/1/continue"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": "rate_limited"})))
        .mount(&server)
        .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = SseTransport::new().open(continue_request(&server), EventSink::new(1, tx));
    let events = collect(&mut rx).await;

    assert_eq!(
        events,
        vec![TransportEvent::Error {
            message: "rate_limited".into()
        }]
    );
}

#[tokio::test]
async fn test_rejected_request_without_error_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks/1/continue"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"detail": "bad"})))
        .mount(&server)
        .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = SseTransport::new().open(continue_request(&server), EventSink::new(1, tx));

    assert_eq!(
        collect(&mut rx).await,
        vec![TransportEvent::Error {
            message: "HTTP_400".into()
        }]
    );
}

#[tokio::test]
async fn test_cancel_before_response_delivers_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks/1/continue"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse(&[("TASK_DONE", "")]), "text/event-stream")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = SseTransport::new().open(continue_request(&server), EventSink::new(1, tx));
    handle.cancel();
    handle.cancel();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(rx.try_recv().is_err());
}

//! Test doubles shared by the listener unit tests.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::Sink;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::listener::dispatch::EventHandler;
use crate::listener::proto::{EventPayload, V2Event, V2EventPayload, WebhookEvent};

/// Sink that records written frames into a shared log.
pub(crate) struct RecordingSink {
    log: Arc<Mutex<Vec<Message>>>,
    fail_writes: bool,
}

impl RecordingSink {
    pub(crate) fn new() -> (Self, Arc<Mutex<Vec<Message>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                log: Arc::clone(&log),
                fail_writes: false,
            },
            log,
        )
    }

    /// Sink whose every write fails with a closed-connection error.
    pub(crate) fn failing() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            fail_writes: true,
        }
    }
}

impl Sink<Message> for RecordingSink {
    type Error = WsError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), WsError> {
        if self.fail_writes {
            return Err(WsError::ConnectionClosed);
        }
        self.log.lock().expect("sink log").push(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        Poll::Ready(Ok(()))
    }
}

/// Handler that records each hook invocation as one line.
///
/// When built with [`RecordingHandler::with_sink_log`], each event line also
/// records how many frames were already written at callback time, which pins
/// down the ack-before-callback ordering.
pub(crate) struct RecordingHandler {
    calls: Mutex<Vec<String>>,
    sink_log: Arc<Mutex<Vec<Message>>>,
}

impl RecordingHandler {
    pub(crate) fn new() -> Self {
        Self::with_sink_log(Arc::new(Mutex::new(Vec::new())))
    }

    pub(crate) fn with_sink_log(sink_log: Arc<Mutex<Vec<Message>>>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            sink_log,
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("handler calls").clone()
    }

    pub(crate) fn sink_log(&self) -> Vec<Message> {
        self.sink_log.lock().expect("sink log").clone()
    }

    fn acks_sent(&self) -> usize {
        self.sink_log
            .lock()
            .expect("sink log")
            .iter()
            .filter(|message| matches!(message, Message::Text(_)))
            .count()
    }

    fn record(&self, line: String) {
        self.calls.lock().expect("handler calls").push(line);
    }
}

impl EventHandler for RecordingHandler {
    fn on_webhook_event(&self, _event: WebhookEvent, parsed: EventPayload) {
        self.record(format!(
            "webhook id={} type={} acks_sent={}",
            parsed.id,
            parsed.event_type,
            self.acks_sent()
        ));
    }

    fn on_v2_event(&self, _event: V2Event, parsed: V2EventPayload) {
        self.record(format!(
            "v2 id={} type={} acks_sent={}",
            parsed.id,
            parsed.event_type,
            self.acks_sent()
        ));
    }

    fn on_unknown_message(&self, raw_type: &str, raw: &str) {
        self.record(format!("unknown raw_type={raw_type} raw={raw}"));
    }
}

/// Extracts `(event_id, webhook_conversation_id, webhook_id)` from each ack
/// frame in the log.
pub(crate) fn ack_ids(messages: &[Message]) -> Vec<(String, String, String)> {
    messages
        .iter()
        .filter_map(|message| match message {
            Message::Text(text) => serde_json::from_str::<serde_json::Value>(text).ok(),
            _ => None,
        })
        .filter(|value| value["type"] == "event_ack")
        .map(|value| {
            (
                value["event_id"].as_str().unwrap_or_default().to_string(),
                value["webhook_conversation_id"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                value["webhook_id"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

//! Frame decoding, acknowledgments, and handler callbacks.
//!
//! Frames are dispatched synchronously and in arrival order. Each recognized
//! event is acknowledged before the handler runs, so a slow handler never
//! delays the ack. Frame- and payload-level failures are absorbed here and
//! never terminate the read loop.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

use crate::listener::proto::{
    EventAck, EventPayload, InboundEnvelope, InboundMessage, V2Event, V2EventPayload, WebhookEvent,
};

/// Callback hooks receiving parsed events from the websocket stream.
///
/// Hooks are invoked synchronously from the read loop, one frame at a time,
/// in the order frames arrive on the wire.
pub trait EventHandler: Send + Sync {
    /// Called for every v1 `webhook_event`, after its ack was emitted.
    fn on_webhook_event(&self, event: WebhookEvent, parsed: EventPayload);

    /// Called for every v2 thin event, after its ack was emitted.
    fn on_v2_event(&self, event: V2Event, parsed: V2EventPayload);

    /// Called for message types the listener does not know. No ack is sent.
    fn on_unknown_message(&self, raw_type: &str, raw: &str);
}

/// Decodes inbound frames, emits acks, and invokes the handler.
pub(crate) struct Dispatcher<S> {
    writer: Arc<Mutex<S>>,
    handler: Arc<dyn EventHandler>,
    write_wait: Duration,
}

impl<S> Dispatcher<S>
where
    S: Sink<Message, Error = WsError> + Unpin + Send,
{
    pub(crate) fn new(
        writer: Arc<Mutex<S>>,
        handler: Arc<dyn EventHandler>,
        write_wait: Duration,
    ) -> Self {
        Self {
            writer,
            handler,
            write_wait,
        }
    }

    /// Handles one text frame. A frame whose body is not valid JSON is logged
    /// and dropped; the caller keeps reading.
    pub(crate) async fn handle_frame(&self, text: &str) {
        match InboundEnvelope::decode(text) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(err) => warn!(event = "malformed_frame", error = %err),
        }
    }

    pub(crate) async fn dispatch(&self, envelope: InboundEnvelope) {
        match envelope.message {
            InboundMessage::Webhook(event) => {
                let parsed: EventPayload = parse_or_empty(&event.event_payload);
                self.send_ack(EventAck::new(
                    &parsed.id,
                    &event.webhook_conversation_id,
                    &event.webhook_id,
                ))
                .await;
                self.handler.on_webhook_event(event, parsed);
            }
            InboundMessage::V2(event) => {
                let parsed: V2EventPayload = parse_or_empty(&event.payload);
                self.send_ack(EventAck::new(&parsed.id, "", &event.destination_id))
                    .await;
                self.handler.on_v2_event(event, parsed);
            }
            InboundMessage::Unrecognized => {
                debug!(event = "unknown_message", raw_type = %envelope.raw_type);
                self.handler
                    .on_unknown_message(&envelope.raw_type, &envelope.raw);
            }
        }
    }

    /// Best-effort ack write under the shared write lock. The server
    /// redelivers unacked events, so a failed write is logged, not propagated.
    async fn send_ack(&self, ack: EventAck) {
        let text = match ack.to_text() {
            Ok(text) => text,
            Err(err) => {
                warn!(event = "ack_encode_failed", event_id = %ack.event_id, error = %err);
                return;
            }
        };

        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(self.write_wait, writer.send(Message::Text(text))).await {
            Ok(Ok(())) => debug!(event = "ack_sent", event_id = %ack.event_id),
            Ok(Err(err)) => {
                warn!(event = "ack_send_failed", event_id = %ack.event_id, error = %err);
            }
            Err(_) => warn!(event = "ack_send_timeout", event_id = %ack.event_id),
        }
    }
}

/// Tolerant inner-payload parse: a malformed payload degrades to an
/// empty-but-valid value instead of dropping the frame.
fn parse_or_empty<T: Default + DeserializeOwned>(raw: &str) -> T {
    match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(event = "payload_parse_failed", error = %err);
            T::default()
        }
    }
}

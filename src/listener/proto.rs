//! Wire messages shared with the event delivery service.
//!
//! Inbound frames are decoded in two phases: the `type` discriminator is
//! probed first, then the matching variant is fully decoded. The raw frame
//! text and raw type string are retained on the envelope so unrecognized
//! messages can be handed to the caller unchanged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Session issued by `POST /v1/stripecli/sessions`.
///
/// Immutable once stored; `websocket_url`, `websocket_id`, and
/// `websocket_authorized_feature` drive the subsequent dial.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Session {
    pub reconnect_delay: u64,
    pub secret: String,
    pub websocket_authorized_feature: String,
    pub websocket_id: String,
    pub websocket_url: String,
    pub default_version: String,
    pub latest_version: String,
}

/// Endpoint descriptor attached to a v1 webhook event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct WebhookEndpoint {
    pub api_version: Option<String>,
}

/// A v1 webhook event pushed over the websocket.
///
/// `event_payload` carries the event body as string-encoded JSON, not a
/// nested object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct WebhookEvent {
    pub endpoint: WebhookEndpoint,
    pub event_payload: String,
    pub http_headers: HashMap<String, String>,
    pub webhook_conversation_id: String,
    pub webhook_id: String,
}

/// A v2 thin event pushed over the websocket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct V2Event {
    pub http_headers: HashMap<String, String>,
    pub payload: String,
    pub destination_id: String,
}

/// Decoded variant of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Webhook(WebhookEvent),
    V2(V2Event),
    Unrecognized,
}

/// One decoded inbound frame, tagged by message type.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    /// Raw `type` discriminator, empty when the frame carried none.
    pub raw_type: String,
    /// Original frame text, byte-for-byte.
    pub raw: String,
    pub message: InboundMessage,
}

impl InboundEnvelope {
    /// Decodes one text frame.
    ///
    /// A frame that is not valid JSON at all is a hard decode failure. A
    /// missing or unknown `type` yields [`InboundMessage::Unrecognized`]
    /// rather than an error.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct TypeProbe {
            #[serde(rename = "type")]
            kind: String,
        }

        let probe: TypeProbe = serde_json::from_str(text)?;
        let message = match probe.kind.as_str() {
            "webhook_event" => InboundMessage::Webhook(serde_json::from_str(text)?),
            "v2_event" => InboundMessage::V2(serde_json::from_str(text)?),
            _ => InboundMessage::Unrecognized,
        };

        Ok(Self {
            raw_type: probe.kind,
            raw: text.to_string(),
            message,
        })
    }
}

/// Parsed contents of [`WebhookEvent::event_payload`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EventPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: i64,
    pub livemode: bool,
    pub api_version: String,
    pub pending_webhooks: i64,
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Parsed contents of [`V2Event::payload`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct V2EventPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
}

/// Outbound acknowledgment for one delivered event. Fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventAck {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub event_id: String,
    pub webhook_conversation_id: String,
    pub webhook_id: String,
}

impl EventAck {
    pub fn new(
        event_id: impl Into<String>,
        webhook_conversation_id: impl Into<String>,
        webhook_id: impl Into<String>,
    ) -> Self {
        Self {
            msg_type: "event_ack".to_string(),
            event_id: event_id.into(),
            webhook_conversation_id: webhook_conversation_id.into(),
            webhook_id: webhook_id.into(),
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

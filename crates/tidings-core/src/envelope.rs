//! Push channel wire format: `{"event": string, "data": object}` JSON envelopes.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    error::{ErrorCategory, SyncError},
    types::{ConversationId, Message, MessageId, UserPresence},
};

/// Raw envelope as carried by the push channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Payload of a `message_deleted` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletedMessages {
    /// Missing for deletions the gateway cannot attribute to a chat.
    #[serde(rename = "chat_id", default)]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub message_ids: Vec<MessageId>,
}

/// Payload of an `error` event sent when a channel-routed action failed server side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerError {
    #[serde(default)]
    pub action: Option<String>,
    pub error: String,
}

/// Decoded inbound event. Adding a kind here forces every router to handle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    NewMessage(Message),
    MessageEdited(Message),
    MessagesDeleted(DeletedMessages),
    UserUpdate(UserPresence),
    Pong,
    ServerError(ServerError),
    /// Event name this client does not know; carried for logging only.
    Unknown { event: String },
}

impl InboundEvent {
    /// Wire name of the event, for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::MessageEdited(_) => "message_edited",
            Self::MessagesDeleted(_) => "message_deleted",
            Self::UserUpdate(_) => "user_update",
            Self::Pong => "pong",
            Self::ServerError(_) => "error",
            Self::Unknown { event } => event,
        }
    }
}

/// Client-to-gateway events. Serialized as `{"event": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    SendMessage {
        chat_id: ConversationId,
        text: String,
        reply_to: Option<MessageId>,
    },
    EditMessage {
        chat_id: ConversationId,
        message_id: MessageId,
        text: String,
    },
    DeleteMessage {
        chat_id: ConversationId,
        message_ids: Vec<MessageId>,
    },
    MarkRead {
        chat_id: ConversationId,
    },
    StartTyping {
        chat_id: ConversationId,
    },
    Ping {},
}

/// Decode one inbound text frame.
///
/// Unknown event names decode successfully to [`InboundEvent::Unknown`]; only malformed
/// JSON or a known event with a malformed payload is an error.
pub fn decode_inbound(frame: &str) -> Result<InboundEvent, SyncError> {
    let envelope: Envelope = serde_json::from_str(frame)
        .map_err(|err| SyncError::serialization("envelope_decode_error", err))?;

    let Envelope { event, data } = envelope;
    let decoded = match event.as_str() {
        "new_message" => InboundEvent::NewMessage(payload(&event, data)?),
        "message_edited" => InboundEvent::MessageEdited(payload(&event, data)?),
        "message_deleted" => InboundEvent::MessagesDeleted(payload(&event, data)?),
        "user_update" => InboundEvent::UserUpdate(payload(&event, data)?),
        "pong" => InboundEvent::Pong,
        "error" => InboundEvent::ServerError(payload(&event, data)?),
        _ => InboundEvent::Unknown { event },
    };
    Ok(decoded)
}

/// Encode an outbound event as a text frame.
pub fn encode_outbound(event: &OutboundEvent) -> Result<String, SyncError> {
    serde_json::to_string(event)
        .map_err(|err| SyncError::serialization("envelope_encode_error", err))
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, SyncError> {
    serde_json::from_value(data).map_err(|err| {
        SyncError::new(
            ErrorCategory::Protocol,
            "payload_decode_error",
            format!("invalid '{event}' payload: {err}"),
        )
    })
}

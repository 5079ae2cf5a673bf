//! Wire protocol between the relay and an out-of-process chat bridge.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use keyword_relay_core::{DeliveryAttempt, InboundEvent, MessageContent, RawPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid base64 in `{field}`: {source}")]
    Base64 {
        field: &'static str,
        source: base64::DecodeError,
    },
}

/// Frame from the bridge to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// New pairing payload.
    Qr { payload: String },
    /// Session open.
    Open,
    /// Session closed.
    Close {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Inbound message.
    Message(BridgeMessage),
    /// Credentials changed (base64 encoded).
    CredsUpdate { data: String },
    /// Reply to a command.
    Ack {
        request_id: Uuid,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        value: Option<Value>,
    },
}

/// Textual representations carried by a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeContent {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Inbound message frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeMessage {
    pub id: String,
    pub chat_id: String,
    #[serde(default)]
    pub from_me: bool,
    /// Absent when the event carries no message at all.
    #[serde(default)]
    pub content: Option<BridgeContent>,
    /// Original message payload (base64 encoded).
    #[serde(default)]
    pub raw: String,
}

impl BridgeMessage {
    /// Convert into an inbound event.
    ///
    /// # Errors
    /// Returns error if the raw payload is not valid base64.
    pub fn into_inbound(self) -> Result<InboundEvent, ProtocolError> {
        let payload = BASE64
            .decode(&self.raw)
            .map_err(|source| ProtocolError::Base64 { field: "raw", source })?;

        let content = self.content.map_or_else(Vec::new, |c| {
            let mut reprs: Vec<MessageContent> = [
                c.conversation.map(MessageContent::PlainText),
                c.extended_text.map(MessageContent::ExtendedText),
                c.caption.map(MessageContent::Caption),
            ]
            .into_iter()
            .flatten()
            .collect();
            if reprs.is_empty() {
                reprs.push(MessageContent::Other);
            }
            reprs
        });

        Ok(InboundEvent {
            message_id: self.id,
            conversation_id: self.chat_id,
            from_self: self.from_me,
            content,
            payload: RawPayload::new(Bytes::from(payload)),
        })
    }
}

/// Frame from the relay to the bridge. Every command is answered by an
/// `ack` carrying the same `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Ask for the protocol version to connect with.
    FetchVersion { request_id: Uuid },
    /// Start (or restart) the chat session.
    Connect { request_id: Uuid, version: String },
    /// Forward an original payload verbatim.
    Relay {
        request_id: Uuid,
        to: String,
        message_id: String,
        raw: String,
    },
    /// Send a plain-text message.
    SendText {
        request_id: Uuid,
        to: String,
        text: String,
    },
}

impl BridgeCommand {
    /// Create a relay command for `attempt`.
    #[must_use]
    pub fn relay(request_id: Uuid, attempt: &DeliveryAttempt<'_>) -> Self {
        Self::Relay {
            request_id,
            to: attempt.destination.to_string(),
            message_id: attempt.correlation_id.to_string(),
            raw: BASE64.encode(attempt.payload.as_bytes()),
        }
    }

    /// Request id the bridge must acknowledge.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        match self {
            Self::FetchVersion { request_id }
            | Self::Connect { request_id, .. }
            | Self::Relay { request_id, .. }
            | Self::SendText { request_id, .. } => *request_id,
        }
    }
}

/// Decode a base64 credentials blob.
///
/// # Errors
/// Returns error if `data` is not valid base64.
pub fn decode_credentials(data: &str) -> Result<Vec<u8>, ProtocolError> {
    BASE64
        .decode(data)
        .map_err(|source| ProtocolError::Base64 { field: "data", source })
}

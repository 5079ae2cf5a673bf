//! Events emitted by the session client.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One-time pairing data a human must present to link the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingPayload(String);

impl PairingPayload {
    /// Wrap a raw pairing string.
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    /// The raw pairing string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairingPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque original message payload owned by the session client.
///
/// Cloning shares the underlying buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPayload(Bytes);

impl RawPayload {
    /// Wrap payload bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Borrow the payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One representation of a message's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Plain conversation body.
    PlainText(String),
    /// Extended body (quoted replies, link previews).
    ExtendedText(String),
    /// Caption attached to a media item.
    Caption(String),
    /// Content with no textual representation (stickers, reactions, ...).
    Other,
}

impl MessageContent {
    /// Extraction precedence; lower wins.
    const fn rank(&self) -> Option<u8> {
        match self {
            Self::PlainText(_) => Some(0),
            Self::ExtendedText(_) => Some(1),
            Self::Caption(_) => Some(2),
            Self::Other => None,
        }
    }

    /// Non-empty text carried by this representation.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::PlainText(s) | Self::ExtendedText(s) | Self::Caption(s) if !s.is_empty() => {
                Some(s.as_str())
            }
            _ => None,
        }
    }
}

/// A received message.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Identifier of the message within its conversation.
    pub message_id: String,
    /// Conversation the message was posted in.
    pub conversation_id: String,
    /// Whether this session sent the message itself.
    pub from_self: bool,
    /// All representations carried by the message. Empty when the event has
    /// no message content at all.
    pub content: Vec<MessageContent>,
    /// Original payload, relayed verbatim on delivery.
    pub payload: RawPayload,
}

impl InboundEvent {
    /// Whether the event carries any message content.
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    /// Extract the message text.
    ///
    /// Picks the first non-empty representation in the order plain body,
    /// extended body, caption, independent of the order in `content`.
    /// Returns an empty string when none carries text.
    #[must_use]
    pub fn text(&self) -> &str {
        self.content
            .iter()
            .filter_map(|c| Some((c.rank()?, c.text()?)))
            .min_by_key(|(rank, _)| *rank)
            .map_or("", |(_, text)| text)
    }
}

/// Cause reported with a lost session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectCause(pub String);

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A new pairing payload must be presented.
    PairingPayloadIssued(PairingPayload),
    /// The session is open.
    Established,
    /// The session closed.
    Lost(DisconnectCause),
    /// A transport became available; any earlier session on it is gone.
    TransportReady,
}

/// Anything the session client emits.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Lifecycle(LifecycleEvent),
    Inbound(InboundEvent),
}

//! Session connection state.

use serde::{Deserialize, Serialize};

use crate::event::PairingPayload;

/// Liveness of the chat session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// No session; establishment may be pending.
    #[default]
    Disconnected,
    /// Waiting for a human to present the pairing payload.
    AwaitingPairing { payload: PairingPayload },
    /// Session open.
    Connected,
}

impl SessionState {
    /// State name without the pairing payload.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::AwaitingPairing { .. } => "awaiting_pairing",
            Self::Connected => "connected",
        }
    }

    /// Pending pairing payload, if any.
    #[must_use]
    pub const fn pairing_payload(&self) -> Option<&PairingPayload> {
        match self {
            Self::AwaitingPairing { payload } => Some(payload),
            _ => None,
        }
    }

    /// Whether the session is open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

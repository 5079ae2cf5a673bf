//! Delivery attempts and their outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::RawPayload;

/// Links a delivery back to the message that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Derive the correlation id from the source message identifier.
    #[must_use]
    pub fn from_message_id(message_id: &str) -> Self {
        Self(message_id.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A verbatim relay request, alive only for the duration of one delivery.
#[derive(Debug)]
pub struct DeliveryAttempt<'a> {
    pub payload: &'a RawPayload,
    pub destination: &'a str,
    pub correlation_id: CorrelationId,
}

/// Result of delivering one candidate event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Original payload relayed verbatim.
    DeliveredPrimary,
    /// Verbatim relay failed; plain-text notification sent instead.
    DeliveredFallback { primary_error: String },
    /// Both attempts failed. `reason` is the fallback error.
    Failed {
        primary_error: String,
        reason: String,
    },
}

impl DeliveryOutcome {
    /// Whether the destination received anything.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

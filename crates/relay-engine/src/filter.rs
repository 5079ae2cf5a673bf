//! Message filter: which inbound events trigger a delivery.

use keyword_relay_core::{InboundEvent, RelayPolicy};

/// Why an event was or was not selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Relay this event.
    Candidate,
    /// The event carries no message content at all.
    NoContent,
    /// Sent by this session.
    FromSelf,
    /// Posted outside the source conversation.
    OtherConversation,
    /// Text does not contain the trigger.
    NoTrigger,
}

/// Classify `event` against `policy`. Rules apply in order; the first
/// rejection wins.
#[must_use]
pub fn classify(event: &InboundEvent, policy: &RelayPolicy) -> Verdict {
    if !event.has_content() {
        return Verdict::NoContent;
    }
    if event.from_self {
        return Verdict::FromSelf;
    }
    if event.conversation_id != policy.source() {
        return Verdict::OtherConversation;
    }
    if policy.trigger().matches(event.text()) {
        Verdict::Candidate
    } else {
        Verdict::NoTrigger
    }
}

/// Whether `event` should be relayed under `policy`.
#[must_use]
pub fn is_relay_candidate(event: &InboundEvent, policy: &RelayPolicy) -> bool {
    classify(event, policy) == Verdict::Candidate
}

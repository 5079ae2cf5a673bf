//! Core types for the keyword relay.
//!
//! This crate provides the fundamental building blocks:
//! - `InboundEvent` / `LifecycleEvent` - What the session client emits
//! - `SessionState` - Connection state owned by the supervisor
//! - `RelayPolicy` - Source, destination and trigger
//! - `DeliveryOutcome` - Result of relaying one message
//! - `ReportStore` - Broadcast + history of delivery reports
//! - Session client and pairing surface traits

pub mod event;
pub mod outcome;
pub mod policy;
pub mod report;
pub mod state;
pub mod traits;

pub use event::{
    DisconnectCause, InboundEvent, LifecycleEvent, MessageContent, PairingPayload, RawPayload,
    SessionEvent,
};
pub use outcome::{CorrelationId, DeliveryAttempt, DeliveryOutcome};
pub use policy::{PolicyError, RelayPolicy, Trigger};
pub use report::{RelayReport, ReportStore};
pub use state::SessionState;
pub use traits::{PairingSurface, SessionClient, SessionError};

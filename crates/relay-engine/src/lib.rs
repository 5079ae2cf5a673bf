//! Relay engine for the keyword relay.
//!
//! Provides:
//! - Message filter deciding which events are relayed
//! - Delivery engine (verbatim relay with plain-text fallback)
//! - Relay controller wiring the session event stream together

pub mod controller;
pub mod delivery;
pub mod filter;

pub use controller::RelayController;
pub use delivery::DeliveryEngine;
pub use filter::{Verdict, classify, is_relay_candidate};

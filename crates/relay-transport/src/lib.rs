//! Transport layer for the keyword relay.
//!
//! Provides:
//! - Bridge wire protocol (JSON + base64)
//! - `BridgeSessionClient` - Session client for an out-of-process chat bridge
//! - Operational endpoints (feature: websocket)
//! - `LogPairingSurface`

pub mod bridge;
pub mod pairing;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod health;

pub use bridge::BridgeSessionClient;
#[cfg(feature = "websocket")]
pub use bridge::bridge_router;
#[cfg(feature = "websocket")]
pub use health::{HealthState, SessionProbe, health_router};
pub use pairing::LogPairingSurface;
pub use protocol::{BridgeCommand, BridgeEvent};

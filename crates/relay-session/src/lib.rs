//! Session supervision for the keyword relay.
//!
//! Provides:
//! - `ConnectionSupervisor` - Session state machine and reconnection worker
//! - `ReconnectPolicy` - Backoff between establishment attempts
//! - `MemorySessionClient` - In-process session client (feature: memory)

#[cfg(feature = "memory")]
pub mod memory;
pub mod reconnect;
pub mod supervisor;

#[cfg(feature = "memory")]
pub use memory::{ClientCall, MemorySessionClient};
pub use reconnect::ReconnectPolicy;
pub use supervisor::ConnectionSupervisor;

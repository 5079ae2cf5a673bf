//! Traits for the external session client and pairing surface.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{event::PairingPayload, outcome::DeliveryAttempt};

/// Chat protocol version negotiated before establishing a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub String);

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hook invoked with serialized credentials whenever they change.
pub type CredentialsHook = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Session client error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session client unavailable")]
    Unavailable,
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// The authenticated chat-protocol connection.
///
/// Events (lifecycle and inbound messages) are delivered separately through
/// a channel handed to the relay controller.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Start (or restart) the session with the given protocol version.
    async fn establish(&self, version: &ProtocolVersion) -> Result<(), SessionError>;

    /// Forward the original payload verbatim.
    async fn relay(&self, attempt: &DeliveryAttempt<'_>) -> Result<(), SessionError>;

    /// Send a plain-text message.
    async fn send_text(&self, destination: &str, text: &str) -> Result<(), SessionError>;

    /// Register the credentials-changed hook.
    fn persist_credentials(&self, hook: CredentialsHook);

    /// Fetch the protocol version to establish with.
    async fn negotiate_protocol_version(&self) -> Result<ProtocolVersion, SessionError>;
}

#[async_trait]
impl<T: SessionClient + ?Sized> SessionClient for Arc<T> {
    async fn establish(&self, version: &ProtocolVersion) -> Result<(), SessionError> {
        (**self).establish(version).await
    }

    async fn relay(&self, attempt: &DeliveryAttempt<'_>) -> Result<(), SessionError> {
        (**self).relay(attempt).await
    }

    async fn send_text(&self, destination: &str, text: &str) -> Result<(), SessionError> {
        (**self).send_text(destination, text).await
    }

    fn persist_credentials(&self, hook: CredentialsHook) {
        (**self).persist_credentials(hook);
    }

    async fn negotiate_protocol_version(&self) -> Result<ProtocolVersion, SessionError> {
        (**self).negotiate_protocol_version().await
    }
}

/// Pairing surface error.
#[derive(Debug, Error)]
pub enum PairingError {
    #[error("Failed to render pairing payload: {0}")]
    Render(String),
}

/// Presents the pairing payload to a human.
///
/// Implement this trait to show the payload through your medium of choice.
pub trait PairingSurface: Send + Sync {
    /// A new pairing payload was issued.
    ///
    /// # Errors
    /// Returns error if the payload could not be presented.
    fn on_pairing_payload(&self, payload: &PairingPayload) -> Result<(), PairingError>;

    /// The session paired; any presented payload is stale.
    fn on_paired(&self);
}

/// Pairing surface that discards everything.
#[derive(Debug, Default, Clone)]
pub struct NoopPairingSurface;

impl PairingSurface for NoopPairingSurface {
    fn on_pairing_payload(&self, _payload: &PairingPayload) -> Result<(), PairingError> {
        Ok(())
    }

    fn on_paired(&self) {}
}

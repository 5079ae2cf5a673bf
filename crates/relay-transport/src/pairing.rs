//! Pairing surface that writes the payload to the log.

use keyword_relay_core::{PairingPayload, PairingSurface, traits::PairingError};

/// Logs each pairing payload so an operator can render it with any QR tool.
///
/// The payload is also served by `GET /pairing` while pairing is pending.
#[derive(Debug, Default, Clone)]
pub struct LogPairingSurface;

impl PairingSurface for LogPairingSurface {
    fn on_pairing_payload(&self, payload: &PairingPayload) -> Result<(), PairingError> {
        if payload.as_str().is_empty() {
            return Err(PairingError::Render("empty pairing payload".to_string()));
        }
        tracing::info!(
            payload = payload.as_str(),
            "Pairing code updated, link it from the phone's linked devices screen"
        );
        Ok(())
    }

    fn on_paired(&self) {
        tracing::info!("Device linked, pairing code discarded");
    }
}

//! Two-tier delivery: verbatim relay, then plain-text fallback.

use std::{future::Future, sync::Arc, time::Duration};

use keyword_relay_core::{
    CorrelationId, DeliveryAttempt, DeliveryOutcome, InboundEvent, RelayPolicy, SessionClient,
    SessionError,
};

/// Delivers candidate events to the destination conversation.
pub struct DeliveryEngine<C> {
    client: Arc<C>,
    attempt_timeout: Option<Duration>,
}

impl<C: SessionClient> DeliveryEngine<C> {
    /// Create an engine with no per-attempt timeout.
    #[must_use]
    pub const fn new(client: Arc<C>) -> Self {
        Self {
            client,
            attempt_timeout: None,
        }
    }

    /// Bound each attempt (primary and fallback) by `timeout`.
    ///
    /// An expired attempt is dropped, not recalled: only use this with
    /// clients whose requests do not outlive the caller.
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Deliver `event` to `policy.destination()`.
    ///
    /// Makes at most one verbatim relay and, only if it fails, at most one
    /// plain-text send. Never retries beyond that.
    pub async fn deliver(&self, event: &InboundEvent, policy: &RelayPolicy) -> DeliveryOutcome {
        let attempt = DeliveryAttempt {
            payload: &event.payload,
            destination: policy.destination(),
            correlation_id: CorrelationId::from_message_id(&event.message_id),
        };

        let primary_error = match self.bounded(self.client.relay(&attempt)).await {
            Ok(()) => {
                tracing::info!(
                    correlation_id = %attempt.correlation_id,
                    destination = attempt.destination,
                    "Message relayed verbatim"
                );
                return DeliveryOutcome::DeliveredPrimary;
            }
            Err(e) => e.to_string(),
        };

        tracing::warn!(
            correlation_id = %attempt.correlation_id,
            error = %primary_error,
            "Verbatim relay failed, falling back to plain text"
        );

        let text = policy.fallback_text(event.text());
        match self
            .bounded(self.client.send_text(attempt.destination, &text))
            .await
        {
            Ok(()) => {
                tracing::warn!(
                    correlation_id = %attempt.correlation_id,
                    "Message delivered as plain text, media and formatting dropped"
                );
                DeliveryOutcome::DeliveredFallback { primary_error }
            }
            Err(e) => {
                tracing::error!(
                    correlation_id = %attempt.correlation_id,
                    error = %e,
                    "Plain-text fallback failed, message dropped"
                );
                DeliveryOutcome::Failed {
                    primary_error,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn bounded<F>(&self, fut: F) -> Result<(), SessionError>
    where
        F: Future<Output = Result<(), SessionError>>,
    {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or(Err(SessionError::Timeout(limit))),
            None => fut.await,
        }
    }
}

//! In-memory session client.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use keyword_relay_core::{
    CorrelationId, DeliveryAttempt, SessionClient, SessionError,
    traits::{CredentialsHook, ProtocolVersion},
};

/// A call received by [`MemorySessionClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    NegotiateVersion,
    Establish(ProtocolVersion),
    Relay {
        destination: String,
        correlation_id: CorrelationId,
        payload_len: usize,
    },
    SendText {
        destination: String,
        text: String,
    },
}

#[derive(Default)]
struct Failures {
    establish: usize,
    relay: Option<String>,
    send_text: Option<String>,
}

/// Session client that records calls and fails on request.
///
/// Useful for development and for exercising the relay without a chat
/// network. Events are injected directly into the controller's channel.
pub struct MemorySessionClient {
    calls: Mutex<Vec<ClientCall>>,
    failures: Mutex<Failures>,
    relay_delay: Mutex<Option<Duration>>,
    establish_delay: Mutex<Option<Duration>>,
    credentials_hook: Mutex<Option<CredentialsHook>>,
    version: ProtocolVersion,
}

impl MemorySessionClient {
    /// Create a client that succeeds at everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Failures::default()),
            relay_delay: Mutex::new(None),
            establish_delay: Mutex::new(None),
            credentials_hook: Mutex::new(None),
            version: ProtocolVersion("2.3000.0".to_string()),
        }
    }

    /// Fail the next `count` establishment attempts.
    pub fn fail_next_establish(&self, count: usize) {
        lock(&self.failures).establish = count;
    }

    /// Fail every relay with `reason` (`None` to succeed again).
    pub fn fail_relay(&self, reason: Option<&str>) {
        lock(&self.failures).relay = reason.map(str::to_string);
    }

    /// Fail every plain-text send with `reason` (`None` to succeed again).
    pub fn fail_send_text(&self, reason: Option<&str>) {
        lock(&self.failures).send_text = reason.map(str::to_string);
    }

    /// Delay every relay by `delay`.
    pub fn set_relay_delay(&self, delay: Option<Duration>) {
        *lock(&self.relay_delay) = delay;
    }

    /// Delay every establishment by `delay`.
    pub fn set_establish_delay(&self, delay: Option<Duration>) {
        *lock(&self.establish_delay) = delay;
    }

    /// Simulate a credentials change. Returns whether a hook was registered.
    pub fn update_credentials(&self, creds: &[u8]) -> bool {
        let hook = lock(&self.credentials_hook).clone();
        hook.is_some_and(|hook| {
            hook(creds);
            true
        })
    }

    /// All calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ClientCall> {
        lock(&self.calls).clone()
    }

    /// Number of establishment calls received.
    #[must_use]
    pub fn establish_count(&self) -> usize {
        self.count(|c| matches!(c, ClientCall::Establish(_)))
    }

    /// Number of relay calls received.
    #[must_use]
    pub fn relay_count(&self) -> usize {
        self.count(|c| matches!(c, ClientCall::Relay { .. }))
    }

    /// Texts sent through `send_text`.
    #[must_use]
    pub fn sent_texts(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                ClientCall::SendText { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&ClientCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: ClientCall) {
        lock(&self.calls).push(call);
    }
}

impl Default for MemorySessionClient {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl SessionClient for MemorySessionClient {
    async fn establish(&self, version: &ProtocolVersion) -> Result<(), SessionError> {
        self.record(ClientCall::Establish(version.clone()));

        let delay = *lock(&self.establish_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut failures = lock(&self.failures);
        if failures.establish > 0 {
            failures.establish -= 1;
            return Err(SessionError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    async fn relay(&self, attempt: &DeliveryAttempt<'_>) -> Result<(), SessionError> {
        self.record(ClientCall::Relay {
            destination: attempt.destination.to_string(),
            correlation_id: attempt.correlation_id.clone(),
            payload_len: attempt.payload.len(),
        });

        let delay = *lock(&self.relay_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match lock(&self.failures).relay.clone() {
            Some(reason) => Err(SessionError::Rejected(reason)),
            None => Ok(()),
        }
    }

    async fn send_text(&self, destination: &str, text: &str) -> Result<(), SessionError> {
        self.record(ClientCall::SendText {
            destination: destination.to_string(),
            text: text.to_string(),
        });

        match lock(&self.failures).send_text.clone() {
            Some(reason) => Err(SessionError::Transport(reason)),
            None => Ok(()),
        }
    }

    fn persist_credentials(&self, hook: CredentialsHook) {
        *lock(&self.credentials_hook) = Some(hook);
    }

    async fn negotiate_protocol_version(&self) -> Result<ProtocolVersion, SessionError> {
        self.record(ClientCall::NegotiateVersion);
        Ok(self.version.clone())
    }
}

//! Connection supervisor: session state and reconnection.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use keyword_relay_core::{
    LifecycleEvent, PairingSurface, SessionClient, SessionError, SessionState,
    traits::{CredentialsHook, ProtocolVersion},
};
use tokio::{
    sync::{Notify, watch},
    task::JoinHandle,
};

use crate::ReconnectPolicy;

struct Shared<C, P> {
    client: Arc<C>,
    pairing: Arc<P>,
    state: watch::Sender<SessionState>,
    reconnect: ReconnectPolicy,
    credentials_hook: Option<CredentialsHook>,
    wake: Notify,
    attempts: AtomicU64,
}

/// Tracks session liveness and drives re-establishment.
///
/// Sole writer of [`SessionState`]. Lifecycle events must be fed in order
/// from a single task.
pub struct ConnectionSupervisor<C, P>
where
    C: SessionClient,
    P: PairingSurface,
{
    shared: Arc<Shared<C, P>>,
}

impl<C, P> ConnectionSupervisor<C, P>
where
    C: SessionClient + 'static,
    P: PairingSurface + 'static,
{
    /// Create a new supervisor in the `Disconnected` state.
    #[must_use]
    pub fn new(client: Arc<C>, pairing: Arc<P>, reconnect: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                client,
                pairing,
                state,
                reconnect,
                credentials_hook: None,
                wake: Notify::new(),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Register `hook` with the client before every establishment.
    ///
    /// Must be called before [`start`](Self::start).
    #[must_use]
    pub fn with_credentials_hook(mut self, hook: CredentialsHook) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.credentials_hook = Some(hook);
        } else {
            tracing::warn!("Supervisor already started, credentials hook ignored");
        }
        self
    }

    /// Spawn the reconnect worker and request the initial establishment.
    pub fn start(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            loop {
                shared.wake.notified().await;
                establish_until_ok(&shared).await;
            }
        });
        self.shared.wake.notify_one();
        handle
    }

    /// Apply one lifecycle event.
    pub fn on_lifecycle_event(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::PairingPayloadIssued(payload) => {
                tracing::info!("Pairing payload issued, waiting for the device to be linked");
                if let Err(e) = self.shared.pairing.on_pairing_payload(&payload) {
                    tracing::warn!(error = %e, "Pairing surface failed to present payload");
                }
                self.shared
                    .state
                    .send_replace(SessionState::AwaitingPairing { payload });
            }
            LifecycleEvent::Established => {
                let previous = self.shared.state.send_replace(SessionState::Connected);
                if previous.pairing_payload().is_some() {
                    self.shared.pairing.on_paired();
                }
                tracing::info!("Session connected");
            }
            LifecycleEvent::Lost(cause) => {
                self.shared.state.send_replace(SessionState::Disconnected);
                tracing::warn!(%cause, "Session lost, scheduling re-establishment");
                self.schedule_establish();
            }
            LifecycleEvent::TransportReady => {
                self.shared.state.send_replace(SessionState::Disconnected);
                tracing::info!("Transport ready, establishing now");
                self.schedule_establish();
            }
        }
    }

    /// Request a fresh establishment.
    ///
    /// Coalesces with a run already in progress into at most one follow-up.
    /// A worker waiting out a backoff delay retries at once.
    pub fn schedule_establish(&self) {
        self.shared.wake.notify_one();
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn current_state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Read-only view of the state for observers.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Whether the session is open.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    /// Establishment attempts made so far.
    #[must_use]
    pub fn establish_attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::Relaxed)
    }
}

async fn establish_once<C, P>(shared: &Shared<C, P>) -> Result<ProtocolVersion, SessionError>
where
    C: SessionClient,
    P: PairingSurface,
{
    if let Some(hook) = &shared.credentials_hook {
        shared.client.persist_credentials(Arc::clone(hook));
    }
    let version = shared.client.negotiate_protocol_version().await?;
    shared.client.establish(&version).await?;
    Ok(version)
}

/// Retry establishment until the client accepts it. Never gives up.
///
/// A wake-up during the backoff wait restarts the sequence at attempt 0.
async fn establish_until_ok<C, P>(shared: &Shared<C, P>)
where
    C: SessionClient,
    P: PairingSurface,
{
    let mut attempt: u32 = 0;
    loop {
        shared.attempts.fetch_add(1, Ordering::Relaxed);
        match establish_once(shared).await {
            Ok(version) => {
                tracing::info!(%version, attempt, "Session establishment started");
                return;
            }
            Err(e) => {
                let delay = shared.reconnect.delay_for_attempt(attempt);
                tracing::error!(
                    error = %e,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Session establishment failed, retrying"
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {
                        attempt = attempt.saturating_add(1);
                    }
                    () = shared.wake.notified() => {
                        tracing::debug!("Backoff interrupted, retrying now");
                        attempt = 0;
                    }
                }
            }
        }
    }
}

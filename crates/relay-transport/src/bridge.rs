//! Session client backed by an out-of-process chat bridge.
//!
//! The bridge owns the chat-protocol connection and attaches to the relay
//! over a WebSocket, pushing [`BridgeEvent`] frames and answering
//! [`BridgeCommand`] frames with acks.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use keyword_relay_core::{
    DeliveryAttempt, DisconnectCause, LifecycleEvent, PairingPayload, SessionClient, SessionError,
    SessionEvent,
    traits::{CredentialsHook, ProtocolVersion},
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::protocol::{BridgeCommand, BridgeEvent, decode_credentials};

/// Capacity of the session event channel.
const EVENT_BUFFER: usize = 1024;

type Reply = Result<Option<Value>, String>;
type Pending = Mutex<HashMap<Uuid, oneshot::Sender<Reply>>>;

struct Link {
    id: Uuid,
    tx: mpsc::UnboundedSender<BridgeCommand>,
}

/// Session client that forwards primitives to an attached bridge.
pub struct BridgeSessionClient {
    link: Mutex<Option<Link>>,
    pending: Pending,
    events: mpsc::Sender<SessionEvent>,
    credentials_hook: Mutex<Option<CredentialsHook>>,
    request_timeout: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drops the pending entry when its request finishes or is abandoned.
struct PendingGuard<'a> {
    pending: &'a Pending,
    request_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.request_id);
    }
}

impl BridgeSessionClient {
    /// Create a client and the event stream it feeds.
    #[must_use]
    pub fn new(request_timeout: Duration) -> (Arc<Self>, mpsc::Receiver<SessionEvent>) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let client = Arc::new(Self {
            link: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            events,
            credentials_hook: Mutex::new(None),
            request_timeout,
        });
        (client, rx)
    }

    /// Whether a bridge is currently attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        lock(&self.link).is_some()
    }

    /// Requests still waiting for an ack.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Attach a bridge, replacing any previous one.
    ///
    /// Requests sent to a replaced bridge fail. Emits `TransportReady` so
    /// the session is established on the new link.
    ///
    /// Returns the link id and the commands to write to the bridge.
    pub async fn attach(&self) -> (Uuid, mpsc::UnboundedReceiver<BridgeCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        {
            let mut link = lock(&self.link);
            if let Some(previous) = link.replace(Link { id, tx }) {
                tracing::warn!(previous = %previous.id, "Bridge replaced by a new connection");
                lock(&self.pending).clear();
            }
        }
        self.emit(SessionEvent::Lifecycle(LifecycleEvent::TransportReady))
            .await;
        (id, rx)
    }

    fn is_current(&self, link_id: Uuid) -> bool {
        lock(&self.link).as_ref().is_some_and(|l| l.id == link_id)
    }

    /// Detach link `id`.
    ///
    /// When it is the current link, pending requests fail and the session
    /// is reported lost.
    pub async fn detach(&self, id: Uuid) {
        let current = {
            let mut link = lock(&self.link);
            if link.as_ref().is_some_and(|l| l.id == id) {
                link.take();
                true
            } else {
                false
            }
        };
        if !current {
            return;
        }

        lock(&self.pending).clear();
        self.emit(SessionEvent::Lifecycle(LifecycleEvent::Lost(
            DisconnectCause("bridge detached".to_string()),
        )))
        .await;
    }

    /// Apply one frame received from bridge `link_id`.
    ///
    /// Frames from a link that is no longer current are dropped.
    pub async fn handle_event(&self, link_id: Uuid, event: BridgeEvent) {
        if !self.is_current(link_id) {
            tracing::debug!(%link_id, "Dropping frame from a replaced bridge");
            return;
        }
        match event {
            BridgeEvent::Qr { payload } => {
                self.emit(SessionEvent::Lifecycle(LifecycleEvent::PairingPayloadIssued(
                    PairingPayload::new(payload),
                )))
                .await;
            }
            BridgeEvent::Open => {
                self.emit(SessionEvent::Lifecycle(LifecycleEvent::Established))
                    .await;
            }
            BridgeEvent::Close { reason } => {
                let cause = DisconnectCause(reason.unwrap_or_else(|| "unknown".to_string()));
                self.emit(SessionEvent::Lifecycle(LifecycleEvent::Lost(cause)))
                    .await;
            }
            BridgeEvent::Message(msg) => match msg.into_inbound() {
                Ok(event) => self.emit(SessionEvent::Inbound(event)).await,
                Err(e) => tracing::warn!("Dropping malformed message frame: {e}"),
            },
            BridgeEvent::CredsUpdate { data } => match decode_credentials(&data) {
                Ok(creds) => {
                    let hook = lock(&self.credentials_hook).clone();
                    match hook {
                        Some(hook) => hook(creds.as_slice()),
                        None => tracing::debug!("Credentials updated, no hook registered"),
                    }
                }
                Err(e) => tracing::warn!("Dropping malformed credentials frame: {e}"),
            },
            BridgeEvent::Ack {
                request_id,
                error,
                value,
            } => {
                let waiter = lock(&self.pending).remove(&request_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(error.map_or(Ok(value), Err));
                    }
                    None => tracing::debug!(%request_id, "Ack for unknown request"),
                }
            }
        }
    }

    async fn emit(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            tracing::warn!("Session event consumer is gone, dropping event");
        }
    }

    async fn request(
        &self,
        build: impl FnOnce(Uuid) -> BridgeCommand + Send,
    ) -> Result<Option<Value>, SessionError> {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        {
            let link = lock(&self.link);
            let Some(link) = link.as_ref() else {
                return Err(SessionError::Unavailable);
            };
            lock(&self.pending).insert(request_id, tx);
            if link.tx.send(build(request_id)).is_err() {
                lock(&self.pending).remove(&request_id);
                return Err(SessionError::Unavailable);
            }
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id,
        };

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply.map_err(SessionError::Rejected),
            Ok(Err(_)) => Err(SessionError::Transport("bridge detached".to_string())),
            Err(_) => Err(SessionError::Timeout(self.request_timeout)),
        }
    }
}

#[async_trait]
impl SessionClient for BridgeSessionClient {
    async fn establish(&self, version: &ProtocolVersion) -> Result<(), SessionError> {
        let version = version.0.clone();
        self.request(|request_id| BridgeCommand::Connect {
            request_id,
            version,
        })
        .await
        .map(|_| ())
    }

    async fn relay(&self, attempt: &DeliveryAttempt<'_>) -> Result<(), SessionError> {
        self.request(|request_id| BridgeCommand::relay(request_id, attempt))
            .await
            .map(|_| ())
    }

    async fn send_text(&self, destination: &str, text: &str) -> Result<(), SessionError> {
        let (to, text) = (destination.to_string(), text.to_string());
        self.request(|request_id| BridgeCommand::SendText {
            request_id,
            to,
            text,
        })
        .await
        .map(|_| ())
    }

    fn persist_credentials(&self, hook: CredentialsHook) {
        *lock(&self.credentials_hook) = Some(hook);
    }

    async fn negotiate_protocol_version(&self) -> Result<ProtocolVersion, SessionError> {
        match self
            .request(|request_id| BridgeCommand::FetchVersion { request_id })
            .await?
        {
            Some(Value::String(version)) => Ok(ProtocolVersion(version)),
            other => Err(SessionError::Rejected(format!(
                "unexpected version reply: {other:?}"
            ))),
        }
    }
}

#[cfg(feature = "websocket")]
mod ws {
    use std::sync::Arc;

    use axum::{
        extract::{
            State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        response::IntoResponse,
    };
    use futures::{SinkExt, StreamExt};

    use super::BridgeSessionClient;
    use crate::protocol::BridgeEvent;

    /// WebSocket upgrade handler for the bridge.
    pub async fn bridge_handler(
        ws: WebSocketUpgrade,
        State(client): State<Arc<BridgeSessionClient>>,
    ) -> impl IntoResponse {
        ws.on_upgrade(|socket| handle_socket(socket, client))
    }

    async fn handle_socket(socket: WebSocket, client: Arc<BridgeSessionClient>) {
        let (mut sender, mut receiver) = socket.split();
        let (link_id, mut commands) = client.attach().await;
        tracing::info!(%link_id, "Bridge attached");

        // Forward commands to the bridge
        let send_task = tokio::spawn(async move {
            while let Some(cmd) = commands.recv().await {
                let json = match serde_json::to_string(&cmd) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize command: {e}");
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        });

        while let Some(msg) = receiver.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(s) => s.into(),
                    Err(_) => continue,
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!("Bridge socket error: {e}");
                    break;
                }
            };

            match serde_json::from_str::<BridgeEvent>(&text) {
                Ok(event) => client.handle_event(link_id, event).await,
                Err(e) => tracing::warn!("Invalid bridge frame: {e}"),
            }
        }

        send_task.abort();
        client.detach(link_id).await;
        tracing::info!(%link_id, "Bridge detached");
    }

    /// Create the bridge router (`GET /bridge`).
    #[must_use]
    pub fn bridge_router(client: Arc<BridgeSessionClient>) -> axum::Router {
        axum::Router::new()
            .route("/bridge", axum::routing::get(bridge_handler))
            .with_state(client)
    }
}

#[cfg(feature = "websocket")]
pub use ws::{bridge_handler, bridge_router};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use keyword_relay_core::{CorrelationId, RawPayload};
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn client() -> (Arc<BridgeSessionClient>, mpsc::Receiver<SessionEvent>) {
        BridgeSessionClient::new(Duration::from_secs(1))
    }

    async fn attached(
        client: &BridgeSessionClient,
        events: &mut mpsc::Receiver<SessionEvent>,
    ) -> (Uuid, mpsc::UnboundedReceiver<BridgeCommand>) {
        let link = client.attach().await;
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Lifecycle(LifecycleEvent::TransportReady))
        ));
        link
    }

    async fn ack(
        client: &BridgeSessionClient,
        link_id: Uuid,
        request_id: Uuid,
        error: Option<&str>,
        value: Option<Value>,
    ) {
        client
            .handle_event(
                link_id,
                BridgeEvent::Ack {
                    request_id,
                    error: error.map(str::to_string),
                    value,
                },
            )
            .await;
    }

    #[tokio::test]
    async fn test_requests_fail_without_bridge() {
        let (client, _events) = client();
        assert!(!client.is_attached());
        assert_eq!(
            client.send_text("dst", "hola").await,
            Err(SessionError::Unavailable)
        );
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_relay_round_trip() {
        let (client, mut events) = client();
        let (link_id, mut commands) = attached(&client, &mut events).await;

        let task = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let payload = RawPayload::new(b"hi".to_vec());
                let attempt = DeliveryAttempt {
                    payload: &payload,
                    destination: "dst@g.us",
                    correlation_id: CorrelationId::from_message_id("M1"),
                };
                client.relay(&attempt).await
            })
        };

        let cmd = commands.recv().await.unwrap();
        let BridgeCommand::Relay {
            request_id,
            to,
            message_id,
            raw,
        } = cmd
        else {
            panic!("Wrong command type");
        };
        assert_eq!(
            (to.as_str(), message_id.as_str(), raw.as_str()),
            ("dst@g.us", "M1", "aGk=")
        );
        assert_ne!(request_id, Uuid::nil());

        ack(&client, link_id, request_id, None, None).await;
        assert_ok!(task.await.unwrap());
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_rejected_ack() {
        let (client, mut events) = client();
        let (link_id, mut commands) = attached(&client, &mut events).await;

        let task = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_text("dst", "hola").await })
        };
        let request_id = commands.recv().await.unwrap().request_id();
        ack(&client, link_id, request_id, Some("not-acceptable"), None).await;

        assert_eq!(
            task.await.unwrap(),
            Err(SessionError::Rejected("not-acceptable".into()))
        );
    }

    #[tokio::test]
    async fn test_request_timeout_clears_pending() {
        let (client, mut events) = BridgeSessionClient::new(Duration::from_millis(20));
        let (_, mut commands) = attached(&client, &mut events).await;

        assert_eq!(
            client.send_text("dst", "hola").await,
            Err(SessionError::Timeout(Duration::from_millis(20)))
        );
        assert!(commands.recv().await.is_some());
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_request_clears_pending() {
        let (client, mut events) = BridgeSessionClient::new(Duration::from_secs(60));
        let (link_id, mut commands) = attached(&client, &mut events).await;
        let payload = RawPayload::new(b"hi".to_vec());
        let attempt = DeliveryAttempt {
            payload: &payload,
            destination: "dst@g.us",
            correlation_id: CorrelationId::from_message_id("M1"),
        };

        // caller gives up long before the bridge would time out
        assert_err!(tokio::time::timeout(Duration::from_millis(20), client.relay(&attempt)).await);
        assert_eq!(client.pending_requests(), 0);

        // a late ack for the abandoned request is ignored
        let request_id = commands.recv().await.unwrap().request_id();
        ack(&client, link_id, request_id, None, None).await;
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_version_negotiation() {
        let (client, mut events) = client();
        let (link_id, mut commands) = attached(&client, &mut events).await;

        let task = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.negotiate_protocol_version().await })
        };
        let request_id = commands.recv().await.unwrap().request_id();
        ack(
            &client,
            link_id,
            request_id,
            None,
            Some(Value::from("2.3000.1023")),
        )
        .await;

        assert_eq!(
            task.await.unwrap(),
            Ok(ProtocolVersion("2.3000.1023".into()))
        );
    }

    #[tokio::test]
    async fn test_detach_reports_lost_and_fails_pending() {
        let (client, mut events) = client();
        let (link_id, mut commands) = attached(&client, &mut events).await;

        let task = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_text("dst", "hola").await })
        };
        commands.recv().await.unwrap();
        client.detach(link_id).await;

        assert_eq!(
            task.await.unwrap(),
            Err(SessionError::Transport("bridge detached".into()))
        );
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Lifecycle(LifecycleEvent::Lost(_)))
        ));
        assert!(!client.is_attached());
    }

    #[tokio::test]
    async fn test_stale_detach_is_ignored() {
        let (client, mut events) = client();
        let (old, _old_commands) = attached(&client, &mut events).await;
        let (_new, _new_commands) = attached(&client, &mut events).await;

        client.detach(old).await;
        assert!(client.is_attached());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_replaced_bridge_is_cut_off() {
        let (client, mut events) = client();
        let (old, mut old_commands) = attached(&client, &mut events).await;

        let task = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_text("dst", "hola").await })
        };
        let request_id = old_commands.recv().await.unwrap().request_id();

        let (new, _new_commands) = attached(&client, &mut events).await;
        assert_eq!(
            task.await.unwrap(),
            Err(SessionError::Transport("bridge detached".into()))
        );

        // frames from the old socket no longer reach the session
        client.handle_event(old, BridgeEvent::Open).await;
        ack(&client, old, request_id, None, None).await;
        assert!(events.try_recv().is_err());

        client.handle_event(new, BridgeEvent::Open).await;
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Lifecycle(LifecycleEvent::Established))
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_frames() {
        let (client, mut events) = client();
        let (link_id, _commands) = attached(&client, &mut events).await;

        client
            .handle_event(
                link_id,
                BridgeEvent::Qr {
                    payload: "2@xyz".into(),
                },
            )
            .await;
        client.handle_event(link_id, BridgeEvent::Open).await;
        client
            .handle_event(link_id, BridgeEvent::Close { reason: None })
            .await;

        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Lifecycle(LifecycleEvent::PairingPayloadIssued(p))) if p.as_str() == "2@xyz"
        ));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Lifecycle(LifecycleEvent::Established))
        ));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Lifecycle(LifecycleEvent::Lost(cause))) if cause.0 == "unknown"
        ));
    }

    #[tokio::test]
    async fn test_credentials_frame_invokes_hook() {
        let (client, mut events) = client();
        let (link_id, _commands) = attached(&client, &mut events).await;
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        client.persist_credentials(Arc::new(move |bytes: &[u8]| {
            counter.fetch_add(bytes.len(), Ordering::SeqCst);
        }));

        client
            .handle_event(
                link_id,
                BridgeEvent::CredsUpdate {
                    data: "a2V5cw==".into(),
                },
            )
            .await;
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }
}

//! Relay controller: routes session events to the supervisor, filter and
//! delivery engine.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use keyword_relay_core::{
    DeliveryOutcome, InboundEvent, LifecycleEvent, PairingSurface, RelayPolicy, RelayReport,
    ReportStore, SessionClient, SessionEvent,
};
use keyword_relay_session::ConnectionSupervisor;
use tokio::sync::mpsc;

use crate::{
    delivery::DeliveryEngine,
    filter::{self, Verdict},
};

/// Composes the supervisor, filter and delivery engine.
pub struct RelayController<C, P>
where
    C: SessionClient,
    P: PairingSurface,
{
    policy: RelayPolicy,
    supervisor: Arc<ConnectionSupervisor<C, P>>,
    delivery: DeliveryEngine<C>,
    reports: Arc<ReportStore>,
}

impl<C, P> RelayController<C, P>
where
    C: SessionClient + 'static,
    P: PairingSurface + 'static,
{
    /// Create a new controller.
    #[must_use]
    pub const fn new(
        policy: RelayPolicy,
        supervisor: Arc<ConnectionSupervisor<C, P>>,
        delivery: DeliveryEngine<C>,
        reports: Arc<ReportStore>,
    ) -> Self {
        Self {
            policy,
            supervisor,
            delivery,
            reports,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &RelayPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn supervisor(&self) -> &Arc<ConnectionSupervisor<C, P>> {
        &self.supervisor
    }

    #[must_use]
    pub const fn reports(&self) -> &Arc<ReportStore> {
        &self.reports
    }

    /// Handle one inbound message. Returns the delivery outcome when the
    /// message was a relay candidate.
    pub async fn on_inbound(&self, event: InboundEvent) -> Option<DeliveryOutcome> {
        tracing::debug!(
            conversation = %event.conversation_id,
            message_id = %event.message_id,
            text = event.text(),
            "Inbound message"
        );

        let verdict = filter::classify(&event, &self.policy);
        if verdict != Verdict::Candidate {
            tracing::trace!(message_id = %event.message_id, ?verdict, "Not relayed");
            return None;
        }

        tracing::info!(
            conversation = %event.conversation_id,
            message_id = %event.message_id,
            trigger = self.policy.trigger().keyword(),
            "Trigger detected, relaying"
        );
        let outcome = self.delivery.deliver(&event, &self.policy).await;
        self.reports
            .push(RelayReport::now(&event.message_id, outcome.clone()));
        Some(outcome)
    }

    /// Handle one lifecycle event.
    pub fn on_lifecycle(&self, event: LifecycleEvent) {
        self.supervisor.on_lifecycle_event(event);
    }

    /// Consume the session event stream until it closes.
    ///
    /// Lifecycle events are applied in order on this task. Each inbound
    /// message is handled on its own task; a panic there is logged and
    /// does not stop the loop.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Lifecycle(event) => {
                    let applied =
                        std::panic::catch_unwind(AssertUnwindSafe(|| self.on_lifecycle(event)));
                    if applied.is_err() {
                        tracing::error!("Lifecycle handler panicked");
                    }
                }
                SessionEvent::Inbound(event) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        let message_id = event.message_id.clone();
                        if AssertUnwindSafe(this.on_inbound(event))
                            .catch_unwind()
                            .await
                            .is_err()
                        {
                            tracing::error!(%message_id, "Inbound handler panicked");
                        }
                    });
                }
            }
        }
        tracing::info!("Session event stream closed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use keyword_relay_core::{
        DeliveryAttempt, DisconnectCause, MessageContent, RawPayload, SessionError, SessionState,
        traits::{CredentialsHook, NoopPairingSurface, ProtocolVersion},
    };
    use keyword_relay_session::{MemorySessionClient, ReconnectPolicy};
    use tokio_test::assert_ok;

    use super::*;

    const SRC: &str = "src@g.us";
    const DST: &str = "dst@g.us";

    fn inbound(id: &str, conv: &str, text: &str) -> InboundEvent {
        InboundEvent {
            message_id: id.into(),
            conversation_id: conv.into(),
            from_self: false,
            content: vec![MessageContent::PlainText(text.into())],
            payload: RawPayload::new(text.as_bytes().to_vec()),
        }
    }

    fn controller<C: SessionClient + 'static>(
        client: &Arc<C>,
    ) -> Arc<RelayController<C, NoopPairingSurface>> {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::clone(client),
            Arc::new(NoopPairingSurface),
            ReconnectPolicy::default(),
        ));
        Arc::new(RelayController::new(
            RelayPolicy::new(SRC, DST).unwrap(),
            supervisor,
            DeliveryEngine::new(Arc::clone(client)),
            Arc::new(ReportStore::new()),
        ))
    }

    async fn wait_for_reports<C, P>(controller: &RelayController<C, P>, count: usize)
    where
        C: SessionClient + 'static,
        P: PairingSurface + 'static,
    {
        for _ in 0..500 {
            if controller.reports().get_history().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("expected {count} reports");
    }

    #[tokio::test]
    async fn test_candidate_is_delivered_and_reported() {
        let client = Arc::new(MemorySessionClient::new());
        let ctl = controller(&client);

        let outcome = ctl.on_inbound(inbound("m1", SRC, "alerta de FRAUDE aqui")).await;

        assert_eq!(outcome, Some(DeliveryOutcome::DeliveredPrimary));
        let history = ctl.reports().get_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].correlation_id.as_str(), "m1");
    }

    #[tokio::test]
    async fn test_non_candidates_touch_nothing() {
        let client = Arc::new(MemorySessionClient::new());
        let ctl = controller(&client);

        assert_eq!(ctl.on_inbound(inbound("m1", DST, "fraude")).await, None);
        assert_eq!(ctl.on_inbound(inbound("m2", SRC, "hola")).await, None);
        assert!(client.calls().is_empty());
        assert!(ctl.reports().get_history().is_empty());
    }

    #[tokio::test]
    async fn test_lost_does_not_abort_inflight_delivery() {
        let client = Arc::new(MemorySessionClient::new());
        client.set_relay_delay(Some(Duration::from_millis(50)));
        let ctl = controller(&client);
        ctl.on_lifecycle(LifecycleEvent::Established);

        let inflight = {
            let ctl = Arc::clone(&ctl);
            tokio::spawn(async move { ctl.on_inbound(inbound("m1", SRC, "fraude")).await })
        };
        while client.relay_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        ctl.on_lifecycle(LifecycleEvent::Lost(DisconnectCause("connection reset".into())));
        assert_eq!(ctl.supervisor().current_state(), SessionState::Disconnected);

        assert_eq!(
            inflight.await.unwrap(),
            Some(DeliveryOutcome::DeliveredPrimary)
        );
    }

    #[tokio::test]
    async fn test_run_routes_events() {
        let client = Arc::new(MemorySessionClient::new());
        let ctl = controller(&client);
        let (tx, rx) = mpsc::channel(8);
        let runner = tokio::spawn(Arc::clone(&ctl).run(rx));

        assert_ok!(tx.send(SessionEvent::Lifecycle(LifecycleEvent::Established)).await);
        assert_ok!(tx.send(SessionEvent::Inbound(inbound("m1", SRC, "FrAuDe"))).await);
        assert_ok!(tx.send(SessionEvent::Inbound(inbound("m2", SRC, "nada"))).await);
        drop(tx);
        assert_ok!(runner.await);

        wait_for_reports(&ctl, 1).await;
        assert!(ctl.supervisor().is_ready());
        assert_eq!(client.relay_count(), 1);
    }

    /// Panics when relaying message `boom`.
    struct PanickingClient;

    #[async_trait]
    impl SessionClient for PanickingClient {
        async fn establish(&self, _version: &ProtocolVersion) -> Result<(), SessionError> {
            Ok(())
        }

        async fn relay(&self, attempt: &DeliveryAttempt<'_>) -> Result<(), SessionError> {
            assert_ne!(attempt.correlation_id.as_str(), "boom", "malformed payload");
            Ok(())
        }

        async fn send_text(&self, _destination: &str, _text: &str) -> Result<(), SessionError> {
            Ok(())
        }

        fn persist_credentials(&self, _hook: CredentialsHook) {}

        async fn negotiate_protocol_version(&self) -> Result<ProtocolVersion, SessionError> {
            Ok(ProtocolVersion("1".into()))
        }
    }

    #[tokio::test]
    async fn test_panicking_event_does_not_stop_loop() {
        let client = Arc::new(PanickingClient);
        let ctl = controller(&client);
        let (tx, rx) = mpsc::channel(8);
        let runner = tokio::spawn(Arc::clone(&ctl).run(rx));

        assert_ok!(tx.send(SessionEvent::Inbound(inbound("boom", SRC, "fraude"))).await);
        assert_ok!(tx.send(SessionEvent::Inbound(inbound("ok", SRC, "fraude"))).await);

        wait_for_reports(&ctl, 1).await;
        assert_eq!(ctl.reports().get_history()[0].message_id, "ok");
        assert!(!runner.is_finished());

        drop(tx);
        assert_ok!(runner.await);
    }
}

//! Liveness, readiness, pairing and report endpoints.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use keyword_relay_core::{PairingSurface, RelayReport, ReportStore, SessionClient, SessionState};
use keyword_relay_session::ConnectionSupervisor;
use serde_json::json;

/// Read-only view of the session for operational endpoints.
pub trait SessionProbe: Send + Sync {
    /// Current session state.
    fn state(&self) -> SessionState;

    /// Establishment attempts made so far.
    fn establish_attempts(&self) -> u64;
}

impl<C, P> SessionProbe for ConnectionSupervisor<C, P>
where
    C: SessionClient + 'static,
    P: PairingSurface + 'static,
{
    fn state(&self) -> SessionState {
        self.current_state()
    }

    fn establish_attempts(&self) -> u64 {
        ConnectionSupervisor::establish_attempts(self)
    }
}

/// Health handler state.
#[derive(Clone)]
pub struct HealthState {
    probe: Arc<dyn SessionProbe>,
    reports: Arc<ReportStore>,
}

impl HealthState {
    /// Create new health state.
    #[must_use]
    pub fn new(probe: Arc<dyn SessionProbe>, reports: Arc<ReportStore>) -> Self {
        Self { probe, reports }
    }
}

async fn healthz(State(state): State<HealthState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "alive",
        "session": state.probe.state().kind(),
        "establish_attempts": state.probe.establish_attempts(),
    }))
}

async fn readyz(State(state): State<HealthState>) -> Response {
    let session = state.probe.state();
    let status = if session.is_connected() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": session.is_connected(),
            "session": session.kind(),
        })),
    )
        .into_response()
}

async fn pairing(State(state): State<HealthState>) -> Response {
    match state.probe.state() {
        SessionState::AwaitingPairing { payload } => {
            Json(json!({ "payload": payload })).into_response()
        }
        other => (
            StatusCode::NOT_FOUND,
            Json(json!({ "session": other.kind() })),
        )
            .into_response(),
    }
}

async fn reports(State(state): State<HealthState>) -> Json<Vec<RelayReport>> {
    Json(state.reports.get_history())
}

/// Create the operational router.
///
/// Routes: `/healthz`, `/readyz`, `/pairing`, `/reports`.
#[must_use]
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/pairing", get(pairing))
        .route("/reports", get(reports))
        .with_state(state)
}

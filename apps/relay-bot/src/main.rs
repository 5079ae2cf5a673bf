//! Keyword relay bot.
//!
//! Run with: cargo run -p keyword-relay-bot
//!
//! A chat bridge attaches to `ws://<listen_addr>/bridge`; messages containing
//! the trigger in the source conversation are forwarded to the destination.
//! Operational endpoints: `/healthz`, `/readyz`, `/pairing`, `/reports`.
//!
//! Configuration comes from `RELAY_CONFIG` (JSON file) and `RELAY_*`
//! environment variables.

mod config;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use keyword_relay_core::{ReportStore, traits::CredentialsHook};
use keyword_relay_engine::{DeliveryEngine, RelayController};
use keyword_relay_session::ConnectionSupervisor;
use keyword_relay_transport::{
    BridgeSessionClient, HealthState, LogPairingSurface, bridge_router, health_router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::BotConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = BotConfig::from_env().context("failed to load configuration")?;
    let policy = match config.policy() {
        Ok(policy) => policy,
        Err(e) => {
            tracing::error!("Refusing to start: {e}");
            return Err(e).context("set RELAY_SOURCE_ID and RELAY_DESTINATION_ID");
        }
    };
    tracing::info!(
        source = policy.source(),
        destination = policy.destination(),
        trigger = policy.trigger().keyword(),
        "Relay policy loaded"
    );

    let (client, events) = BridgeSessionClient::new(config.request_timeout());

    let credentials_hook: CredentialsHook = Arc::new(|creds: &[u8]| {
        tracing::debug!(bytes = creds.len(), "Session credentials updated");
    });
    let supervisor = Arc::new(
        ConnectionSupervisor::new(
            Arc::clone(&client),
            Arc::new(LogPairingSurface),
            config.reconnect_policy(),
        )
        .with_credentials_hook(credentials_hook),
    );

    // The bridge bounds each request itself; see `BotConfig::request_timeout`.
    let delivery = DeliveryEngine::new(Arc::clone(&client));

    let reports = Arc::new(ReportStore::new());
    let controller = Arc::new(RelayController::new(
        policy,
        Arc::clone(&supervisor),
        delivery,
        Arc::clone(&reports),
    ));

    // Build router
    let app = Router::new()
        .merge(bridge_router(Arc::clone(&client)))
        .merge(health_router(HealthState::new(supervisor.clone(), reports)))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!("Listening on http://{}", config.listen_addr);

    let reconnect_worker = supervisor.start();
    let relay = tokio::spawn(controller.run(events));

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("HTTP server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    reconnect_worker.abort();
    relay.abort();
    Ok(())
}

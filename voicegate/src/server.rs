//! Server lifecycle
//!
//! Wires the signaling core to the WebSocket gateway, serves it over
//! axum, and shuts down on ctrl-c.

use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tracing::info;

use voicegate_gateway::{voice_handler, GatewayState};
use voicegate_signaling::{
    Config, KeyframeCoordinator, LocalMediaEngine, MediaEngine, RoomRegistry, UpdateFanout,
};

pub async fn run(config: Config) -> Result<()> {
    let engine: Arc<dyn MediaEngine> = Arc::new(LocalMediaEngine::new());
    let registry = Arc::new(RoomRegistry::new(config.signaling.clone()));
    let fanout = Arc::new(UpdateFanout::new(
        Arc::clone(&registry),
        Arc::clone(&engine),
        config.signaling.clone(),
    ));
    let keyframes = Arc::new(KeyframeCoordinator::new(Arc::clone(&engine)));

    let state = Arc::new(GatewayState {
        fanout,
        keyframes,
        config: config.signaling.clone(),
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/voice/{room_id}", get(voice_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.listen_address()).await?;
    info!("Gateway listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Voicegate stopped");
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        return;
    }
    info!("Shutdown signal received");
}

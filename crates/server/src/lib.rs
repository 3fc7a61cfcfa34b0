//! Natter Chat Server Library
//!
//! JSON-over-WebSocket delivery on top of the natter-core hub.

pub mod config;
pub mod error;
pub mod ws;

use axum::{routing::get, Router};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use natter_core::{Hub, InMemoryDirectory, InMemoryMessageRepository};

use config::{AppState, ServerConfig};

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    info!("=== Natter Server ===");
    info!("Protocol: JSON events over WebSocket");
    info!("Features: Fanout | Acks | Read Receipts | Presence | History");

    let config = ServerConfig::from_env();
    info!("Participant scope: {:?}", config.core.scope);
    info!(
        "Heartbeat every {}s, idle timeout {}s",
        config.heartbeat_secs, config.ws_timeout_secs
    );

    // In-memory collaborators; swap for real ones behind the traits.
    let repository = Arc::new(InMemoryMessageRepository::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let hub = Arc::new(Hub::new(config.core.clone(), repository, directory));

    let app = app(AppState {
        hub,
        config: config.clone(),
    });

    let addr = config.bind_addr();
    info!("");
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║  Natter Chat Server Running                                ║");
    info!("╚════════════════════════════════════════════════════════════╝");
    info!("");
    info!("Listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws/chat/{{chat_id}}?identity=NAME", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the HTTP surface over the given state.
pub fn app(state: AppState) -> Router {
    Router::new()
        // Delivery endpoint
        .route("/ws/chat/{chat_id}", get(ws::ws_handler))
        // Health check
        .route("/health", get(health_check))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "OK - Natter Chat Server"
}

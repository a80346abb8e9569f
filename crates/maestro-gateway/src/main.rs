//! Maestro Gateway - orchestration engine behind HTTP and WebSocket.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use maestro_core::{EngineConfig, RunController};
use maestro_gateway::{create_router, AppState};
use maestro_store::open_store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Maestro Gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::from_env();
    let checkpoint_dir =
        std::env::var("CHECKPOINT_DIR").unwrap_or_else(|_| "./data/checkpoints".to_string());
    let checkpointer = open_store(config.checkpoint_store, &checkpoint_dir);

    let registry = Arc::new(maestro_agents::default_registry());
    info!(agents = ?registry.names(), "agent registry initialized");

    let controller = Arc::new(RunController::new(registry, checkpointer).with_config(config));
    let state = AppState::new(controller);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let host = std::env::var("MAESTRO_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("MAESTRO_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

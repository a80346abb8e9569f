//! # maestro-gateway
//!
//! HTTP/WebSocket façade over the orchestration engine:
//!
//! - `POST /invoke` - synchronous run, returns the terminal results
//! - `GET /ws` - duplex subscriber channel (invoke in, events out)
//! - `GET /agents` - registered agent listing
//! - `GET /threads/{thread_id}/checkpoints` - session snapshot index
//! - `GET /health` - liveness probe

mod api;
mod error;
mod ws;

pub use error::GatewayError;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use maestro_core::RunController;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<RunController>,
}

impl AppState {
    pub fn new(controller: Arc<RunController>) -> Self {
        Self { controller }
    }
}

/// Build the gateway router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/invoke", post(api::invoke))
        .route("/agents", get(api::list_agents))
        .route("/threads/:thread_id/checkpoints", get(api::list_checkpoints))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

// ============================================================================
// TESTS
// ============================================================================

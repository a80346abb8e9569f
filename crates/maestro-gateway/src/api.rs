//! Synchronous REST endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use maestro_core::{Checkpointer, InvokeRequest, NullSink, ResultRecord, ThreadId};

use crate::error::GatewayError;
use crate::AppState;

// ============================================================================
// REQUEST / RESPONSE SHAPES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct InvokeBody {
    pub input: InvokeInput,
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Reserved for per-request overrides; accepted and currently unused.
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct InvokeInput {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct InvokeResponse {
    pub thread_id: String,
    pub results: BTreeMap<String, ResultRecord>,
    pub is_complete: bool,
}

#[derive(Debug, Serialize)]
pub struct AgentInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckpointInfo {
    pub checkpoint_id: String,
    pub node: String,
    pub step: u64,
    pub created_at: String,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Run a request to completion and return the terminal results.
pub async fn invoke(
    State(state): State<AppState>,
    Json(body): Json<InvokeBody>,
) -> Result<Json<InvokeResponse>, GatewayError> {
    let request = InvokeRequest {
        input: body.input.message,
        thread_id: body.thread_id,
    };
    let outcome = state.controller.run(request, Arc::new(NullSink)).await?;
    Ok(Json(InvokeResponse {
        thread_id: outcome.thread_id.to_string(),
        results: outcome.results,
        is_complete: outcome.is_complete,
    }))
}

/// List the registered agents.
pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentInfo>> {
    let agents = state
        .controller
        .registry()
        .descriptions()
        .into_iter()
        .map(|(name, description)| AgentInfo { name, description })
        .collect();
    Json(agents)
}

/// List a session's checkpoints, newest first.
pub async fn list_checkpoints(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<Vec<CheckpointInfo>>, GatewayError> {
    let listed = state
        .controller
        .checkpointer()
        .list(&ThreadId::new(thread_id))
        .await?;
    Ok(Json(
        listed
            .into_iter()
            .map(|(id, meta)| CheckpointInfo {
                checkpoint_id: id.to_string(),
                node: meta.node,
                step: meta.step,
                created_at: meta.created_at.to_rfc3339(),
            })
            .collect(),
    ))
}

// ============================================================================
// TESTS
// ============================================================================

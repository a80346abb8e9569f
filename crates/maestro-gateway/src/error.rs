//! Gateway error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use maestro_core::{EngineError, ErrorKind};

/// Errors surfaced over HTTP.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Checkpoint store error: {0}")]
    Store(#[from] maestro_core::CheckpointError),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::Engine(EngineError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            GatewayError::Engine(EngineError::CyclicPlan(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Engine(err) => err.kind(),
            GatewayError::Store(_) => ErrorKind::FatalKernel,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));
        (status, body).into_response()
    }
}

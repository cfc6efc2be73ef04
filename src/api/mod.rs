/// HTTP API Layer
///
/// Thin axum surface over the engine:
/// - Project and workflow seeding
/// - Execution start, status, cancel and the WebSocket event stream
/// - Streaming a single agent's generation over a WebSocket
/// - Agent catalogue and health reporting

use crate::agents::LlmBackend;
use crate::error::EngineError;
use crate::runtime::ExecutionEngine;
use crate::workflow::WorkflowStore;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;

// Project and workflow seeding endpoints
pub mod projects;

// Execution endpoints (POST execute, GET status, POST cancel, WS events)
pub mod executions;

// Agent catalogue and health endpoints
pub mod health;

// Ad-hoc agent generation streamed chunk by chunk
pub mod generate;

// Re-export router builders
pub use executions::create_execution_routes;
pub use generate::create_generate_routes;
pub use health::create_health_routes;
pub use projects::create_project_routes;

/// Shared state for every route
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ExecutionEngine>,
    pub store: Arc<dyn WorkflowStore>,
    /// Backend behind the streaming generation route
    pub backend: Arc<dyn LlmBackend>,
}

pub(crate) fn storage_error(e: anyhow::Error) -> EngineError {
    EngineError::InternalFault(format!("storage failure: {}", e))
}

/// HTTP status for an engine error
pub fn status_for(error: &EngineError) -> StatusCode {
    match error {
        EngineError::GraphNotFound(_) | EngineError::ExecutionNotFound(_) | EngineError::UnknownAgentKind(_) => {
            StatusCode::NOT_FOUND
        }
        EngineError::GraphCycle(_) | EngineError::InvalidGraph(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::ValidationFailure(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            tracing::error!("❌ Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Agent catalogue and health endpoints

use crate::api::AppState;
use crate::agents::AgentDescriptor;
use crate::health::{ErrorRecord, ErrorStatistics, HealthReport, MonitorSummary, REPORTED_RECENT_ERRORS};
use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub statistics: ErrorStatistics,
    pub recent: Vec<ErrorRecord>,
}

pub fn create_health_routes() -> Router<AppState> {
    Router::new()
        .route("/api/agents", get(list_agents))
        .route("/api/health", get(health_report))
        .route("/api/health/agents", get(agent_health))
        .route("/api/health/errors", get(error_report))
}

/// GET /api/agents
async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentDescriptor>> {
    Json(state.engine.registry().list())
}

/// GET /api/health
async fn health_report(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.engine.health_report())
}

/// GET /api/health/agents
async fn agent_health(State(state): State<AppState>) -> Json<MonitorSummary> {
    Json(state.engine.monitor().summary())
}

/// GET /api/health/errors
async fn error_report(State(state): State<AppState>) -> Json<ErrorReport> {
    let recovery = state.engine.recovery();
    Json(ErrorReport {
        statistics: recovery.statistics(),
        recent: recovery.recent_errors(REPORTED_RECENT_ERRORS),
    })
}

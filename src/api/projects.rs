/// Project and workflow seeding endpoints
///
/// Store a project and its editor graph so it can be executed. Graphs are
/// validated before they are saved, so a stored workflow always compiles.

use crate::api::{storage_error, AppState};
use crate::error::EngineError;
use crate::project::Project;
use crate::workflow::{ExecutionPlan, WorkflowGraph};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::put,
    Router,
};
use serde::Serialize;

/// Response for save operations
#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub id: String,
    pub message: String,
}

pub fn create_project_routes() -> Router<AppState> {
    Router::new()
        .route("/api/projects/{project_id}", put(save_project).get(get_project))
        .route("/api/projects/{project_id}/workflow", put(save_workflow).get(get_workflow))
}

/// PUT /api/projects/{project_id}
/// Body: { "name": "...", "description": "...", ... }; the path id wins
async fn save_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(mut project): Json<Project>,
) -> Result<Json<SaveResponse>, EngineError> {
    project.id = project_id;
    if project.name.trim().is_empty() {
        return Err(EngineError::ValidationFailure("project name must not be empty".to_string()));
    }

    state.store.save_project(&project).await.map_err(storage_error)?;
    tracing::info!("💾 Saved project: {} ({})", project.id, project.name);

    Ok(Json(SaveResponse {
        message: format!("Project '{}' saved", project.name),
        id: project.id,
    }))
}

/// GET /api/projects/{project_id}
async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Project>, EngineError> {
    state
        .store
        .get_project(&project_id)
        .await
        .map_err(storage_error)?
        .map(Json)
        .ok_or(EngineError::GraphNotFound(project_id))
}

/// PUT /api/projects/{project_id}/workflow
/// Body: { "nodes": [...], "edges": [...] } in the editor's format
async fn save_workflow(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(workflow): Json<WorkflowGraph>,
) -> Result<Json<SaveResponse>, EngineError> {
    let plan = ExecutionPlan::compile(workflow)?;
    state
        .store
        .save_workflow(&project_id, plan.graph())
        .await
        .map_err(storage_error)?;
    tracing::info!("💾 Saved workflow for project {} ({} nodes)", project_id, plan.len());

    Ok(Json(SaveResponse {
        message: format!("Workflow with {} node(s) saved", plan.len()),
        id: project_id,
    }))
}

/// GET /api/projects/{project_id}/workflow
async fn get_workflow(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<WorkflowGraph>, EngineError> {
    state
        .store
        .get_workflow(&project_id)
        .await
        .map_err(storage_error)?
        .map(Json)
        .ok_or(EngineError::GraphNotFound(project_id))
}

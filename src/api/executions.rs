/// Execution endpoints
///
/// Start a project's workflow, poll or cancel an execution, and stream its status
/// events over a WebSocket. The stream is best-effort: consumers may see
/// duplicates and should treat the latest snapshot as authoritative.

use crate::api::AppState;
use crate::error::EngineError;
use crate::runtime::{ExecutionEngine, ExecutionRecord};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Response for an accepted execute request
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub execution_id: String,
    pub status: &'static str,
}

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/projects/{project_id}/execute", post(execute_project))
        .route("/api/projects/{project_id}/executions/{execution_id}", get(execution_status))
        .route(
            "/api/projects/{project_id}/executions/{execution_id}/cancel",
            post(cancel_execution),
        )
        .route("/api/ws/executions/{execution_id}", get(execution_events))
}

/// POST /api/projects/{project_id}/execute
/// Returns: { "execution_id": "...", "status": "started" }
async fn execute_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<ExecuteResponse>, EngineError> {
    let execution_id = state.engine.execute_workflow(&project_id).await?;
    Ok(Json(ExecuteResponse {
        execution_id,
        status: "started",
    }))
}

/// Snapshot scoped to the project in the path
fn scoped_snapshot(engine: &ExecutionEngine, project_id: &str, execution_id: &str) -> Result<ExecutionRecord, EngineError> {
    let record = engine.get_execution_status(execution_id)?;
    if record.project_id != project_id {
        return Err(EngineError::ExecutionNotFound(execution_id.to_string()));
    }
    Ok(record)
}

/// GET /api/projects/{project_id}/executions/{execution_id}
async fn execution_status(
    State(state): State<AppState>,
    Path((project_id, execution_id)): Path<(String, String)>,
) -> Result<Json<ExecutionRecord>, EngineError> {
    scoped_snapshot(&state.engine, &project_id, &execution_id).map(Json)
}

/// POST /api/projects/{project_id}/executions/{execution_id}/cancel
async fn cancel_execution(
    State(state): State<AppState>,
    Path((project_id, execution_id)): Path<(String, String)>,
) -> Result<Json<ExecutionRecord>, EngineError> {
    scoped_snapshot(&state.engine, &project_id, &execution_id)?;
    state.engine.cancel_execution(&execution_id).map(Json)
}

/// GET /api/ws/executions/{execution_id}
///
/// Sends `{"type":"snapshot", ...}` first, then every event for the execution
/// until it finishes.
async fn execution_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Response, EngineError> {
    state.engine.get_execution_status(&execution_id)?;
    let engine = state.engine.clone();
    Ok(ws
        .on_upgrade(move |socket| stream_execution(socket, engine, execution_id))
        .into_response())
}

fn snapshot_message(record: &ExecutionRecord) -> Option<Message> {
    serde_json::to_string(&json!({ "type": "snapshot", "execution": record }))
        .ok()
        .map(|text| Message::Text(text.into()))
}

async fn stream_execution(socket: WebSocket, engine: Arc<ExecutionEngine>, execution_id: String) {
    tracing::info!("🔌 WebSocket subscribed to execution {}", execution_id);
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Subscribe before the snapshot so no transition falls in between
    let mut events = engine.subscribe();
    let Ok(snapshot) = engine.get_execution_status(&execution_id) else {
        return;
    };
    let finished = snapshot.status.is_terminal();
    if let Some(message) = snapshot_message(&snapshot) {
        if ws_tx.send(message).await.is_err() {
            return;
        }
    }

    if !finished {
        loop {
            tokio::select! {
                incoming = ws_rx.next() => match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                },
                event = events.recv() => match event {
                    Ok(event) if event.execution_id() == execution_id => {
                        let done = event.is_final();
                        if let Ok(text) = serde_json::to_string(&event) {
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        if done {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!("⏩ WebSocket lagged by {} events, resending snapshot", missed);
                        let Ok(snapshot) = engine.get_execution_status(&execution_id) else { break };
                        if let Some(message) = snapshot_message(&snapshot) {
                            if ws_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        if snapshot.status.is_terminal() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    let _ = ws_tx.send(Message::Close(None)).await;
    tracing::debug!("🔌 WebSocket for execution {} closed", execution_id);
}


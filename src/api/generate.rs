/// Streaming generation endpoint
///
/// Runs one agent's prompt against the LLM backend outside of any workflow and
/// forwards the answer over a WebSocket as it is produced. Closing the socket
/// cancels the generation.

use crate::agents::{stream_generation, AgentContext, ChunkStream, LlmRequest};
use crate::api::{storage_error, AppState};
use crate::error::EngineError;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
pub struct GenerateQuery {
    pub prompt: String,
}

pub fn create_generate_routes() -> Router<AppState> {
    Router::new().route(
        "/api/ws/projects/{project_id}/agents/{kind}/generate",
        get(generate_stream),
    )
}

/// GET /api/ws/projects/{project_id}/agents/{kind}/generate?prompt=...
///
/// Frames: `{"type":"chunk","text":...}` per chunk, then `{"type":"done"}` or
/// `{"type":"error","error":...}`, then Close.
async fn generate_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((project_id, kind)): Path<(String, String)>,
    Query(query): Query<GenerateQuery>,
) -> Result<Response, EngineError> {
    let agent = state.engine.registry().resolve(&kind)?;
    let project = state
        .store
        .get_project(&project_id)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| EngineError::GraphNotFound(project_id.clone()))?;

    let context = AgentContext {
        project_id: project.id,
        project_name: project.name,
        project_description: project.description,
        user_input: query.prompt,
        ..Default::default()
    };
    if let Some(field) = context.missing_required_field() {
        return Err(EngineError::ValidationFailure(format!("missing required field: {}", field)));
    }

    let request = LlmRequest {
        system_prompt: agent.system_prompt(),
        prompt: context.format(),
        ..Default::default()
    };
    tracing::info!("🧠 Streaming {} generation for project {}", agent.name(), project_id);

    let backend = state.backend.clone();
    Ok(ws
        .on_upgrade(move |socket| async move {
            let chunks = stream_generation(backend, request, CancellationToken::new());
            forward_chunks(socket, chunks).await;
        })
        .into_response())
}

fn frame(value: Value) -> Message {
    Message::Text(value.to_string().into())
}

async fn forward_chunks(socket: WebSocket, mut chunks: ChunkStream) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                    tracing::debug!("🛑 Client left mid-generation, cancelling");
                    chunks.cancel();
                    return;
                }
                Some(Ok(_)) => {}
            },
            chunk = chunks.next_chunk() => {
                let (message, last) = match chunk {
                    Some(Ok(text)) => (frame(json!({ "type": "chunk", "text": text })), false),
                    Some(Err(error)) => (frame(json!({ "type": "error", "error": error })), true),
                    None => (frame(json!({ "type": "done" })), true),
                };
                if ws_tx.send(message).await.is_err() {
                    chunks.cancel();
                    return;
                }
                if last {
                    break;
                }
            }
        }
    }

    let _ = ws_tx.send(Message::Close(None)).await;
}

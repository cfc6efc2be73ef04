//! HTTP surface driven through the router without binding a socket

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use common::{engine_with, Canned, Scripted, PROJECT};
use flynt_orchestrator::agents::{Agent, AgentKind};
use flynt_orchestrator::api::AppState;
use flynt_orchestrator::config::EngineConfig;
use flynt_orchestrator::runtime::ExecutionEngine;
use flynt_orchestrator::server::build_router;
use flynt_orchestrator::workflow::{WorkflowGraph, WorkflowStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> (Router, Arc<ExecutionEngine>) {
    let agents: Vec<Arc<dyn Agent>> = vec![
        Scripted::new(AgentKind::Idea, vec![Ok("ideas")]),
        Scripted::new(AgentKind::Coder, vec![Ok("code")]),
    ];
    let (engine, store) = engine_with(WorkflowGraph::default(), agents, EngineConfig::default());
    let store: Arc<dyn WorkflowStore> = store;
    let router = build_router(AppState { engine: engine.clone(), store, backend: Canned::new("generated") });
    (router, engine)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn two_step_workflow() -> Value {
    json!({
        "nodes": [
            { "id": "a", "type": "idea", "data": { "prompt": "brainstorm" }, "position": { "x": 0.0, "y": 0.0 } },
            { "id": "b", "type": "agent", "data": { "agentType": "coder", "prompt": "implement" } }
        ],
        "edges": [ { "id": "e1", "source": "a", "target": "b" } ]
    })
}

#[tokio::test]
async fn healthz_is_ok() {
    let (app, _) = app();
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn seeded_project_runs_to_completion() {
    let (app, engine) = app();

    let (status, body) = send(&app, "PUT", "/api/projects/shop", Some(json!({ "name": "Shop", "description": "Online shop" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "shop");

    let (status, _) = send(&app, "PUT", "/api/projects/shop/workflow", Some(two_step_workflow())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", "/api/projects/shop/workflow", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodes"].as_array().unwrap().len(), 2);

    let (status, body) = send(&app, "POST", "/api/projects/shop/execute", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "started");
    let execution_id = body["execution_id"].as_str().unwrap().to_string();

    common::wait(&engine, &execution_id).await;

    let (status, body) = send(&app, "GET", &format!("/api/projects/shop/executions/{execution_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["node_results"]["b"]["result"]["output"], "code");

    // Scoped to the owning project
    let (status, _) = send(&app, "GET", &format!("/api/projects/{PROJECT}/executions/{execution_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cyclic_workflow_is_unprocessable() {
    let (app, _) = app();
    let workflow = json!({
        "nodes": [ { "id": "a", "type": "idea" }, { "id": "b", "type": "coder" } ],
        "edges": [
            { "id": "e1", "source": "a", "target": "b" },
            { "id": "e2", "source": "b", "target": "a" }
        ]
    });
    let (status, body) = send(&app, "PUT", "/api/projects/loop/workflow", Some(workflow)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("cycle"));

    let (status, _) = send(&app, "GET", "/api/projects/loop/workflow", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn executing_an_unknown_project_is_not_found() {
    let (app, _) = app();
    let (status, body) = send(&app, "POST", "/api/projects/missing/execute", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Workflow not found for project: missing");
}

#[tokio::test]
async fn blank_project_name_is_rejected() {
    let (app, _) = app();
    let (status, _) = send(&app, "PUT", "/api/projects/x", Some(json!({ "name": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_of_finished_execution_keeps_its_status() {
    let (app, engine) = app();
    let (_, body) = send(&app, "POST", &format!("/api/projects/{PROJECT}/execute"), None).await;
    let execution_id = body["execution_id"].as_str().unwrap().to_string();
    common::wait(&engine, &execution_id).await;

    let (status, body) = send(&app, "POST", &format!("/api/projects/{PROJECT}/executions/{execution_id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn agent_catalogue_and_health_views() {
    let (app, _) = app();

    let (status, body) = send(&app, "GET", "/api/agents", None).await;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<&str> = body.as_array().unwrap().iter().map(|a| a["kind"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["idea", "coder"]);

    let (status, body) = send(&app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["recent_errors"], json!([]));

    let (status, body) = send(&app, "GET", "/api/health/agents", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_agents"], 0);

    let (status, body) = send(&app, "GET", "/api/health/errors", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["statistics"]["total_errors"], 0);
}

fn upgrade(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn websocket_route_rejects_unknown_execution() {
    let (app, _) = app();
    let response = app.oneshot(upgrade("/api/ws/executions/nope")).await.unwrap();
    assert_ne!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
}

//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use flynt_orchestrator::agents::{
    Agent, AgentContext, AgentKind, AgentRegistry, AgentResult, LlmBackend, LlmRequest, LlmResponse, Usage,
};
use flynt_orchestrator::config::EngineConfig;
use flynt_orchestrator::project::Project;
use flynt_orchestrator::runtime::{ExecutionEngine, ExecutionRecord};
use flynt_orchestrator::workflow::{InMemoryWorkflowStore, WorkflowGraph, WorkflowNode};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PROJECT: &str = "p1";

/// Replies from a script, repeating the last entry, and records every context it saw
pub struct Scripted {
    kind: AgentKind,
    script: Vec<Result<&'static str, &'static str>>,
    delay: Duration,
    calls: AtomicUsize,
    contexts: Mutex<Vec<AgentContext>>,
}

impl Scripted {
    pub fn new(kind: AgentKind, script: Vec<Result<&'static str, &'static str>>) -> Arc<Self> {
        Self::slow(kind, script, Duration::ZERO)
    }

    pub fn slow(kind: AgentKind, script: Vec<Result<&'static str, &'static str>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script,
            delay,
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<AgentContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for Scripted {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    fn description(&self) -> &str {
        "scripted test agent"
    }

    fn system_prompt(&self) -> String {
        String::new()
    }

    async fn execute(&self, context: &AgentContext) -> anyhow::Result<AgentResult> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(context.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let step = self.script[n.min(self.script.len() - 1)];
        Ok(match step {
            Ok(text) => AgentResult::success(self.name(), text, 0.01),
            Err(error) => AgentResult::failure(self.name(), error, 0.01),
        })
    }
}

/// Backend that answers every request with the same text and keeps the requests
pub struct Canned {
    text: &'static str,
    requests: Mutex<Vec<LlmRequest>>,
}

impl Canned {
    pub fn new(text: &'static str) -> Arc<Self> {
        Arc::new(Self { text, requests: Mutex::new(Vec::new()) })
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmBackend for Canned {
    async fn generate(&self, request: &LlmRequest) -> LlmResponse {
        self.requests.lock().unwrap().push(request.clone());
        LlmResponse::ok(self.text, Usage::default())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Backend whose calls never return; flags when a call starts and when it is dropped
#[derive(Default)]
pub struct Stalled {
    pub started: AtomicBool,
    pub abandoned: Arc<AtomicBool>,
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmBackend for Stalled {
    async fn generate(&self, _request: &LlmRequest) -> LlmResponse {
        let _guard = SetOnDrop(self.abandoned.clone());
        self.started.store(true, Ordering::SeqCst);
        std::future::pending::<()>().await;
        LlmResponse::failed("unreachable")
    }

    async fn health_check(&self) -> bool {
        false
    }
}

/// Poll `flag` until it is set or a second has passed
pub async fn eventually(flag: &AtomicBool) -> bool {
    for _ in 0..100 {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    flag.load(Ordering::SeqCst)
}

pub fn node(id: &str, kind: &str) -> WorkflowNode {
    WorkflowNode::new(id, kind).with_param("prompt", json!(format!("task for {id}")))
}

pub fn project() -> Project {
    Project::new(PROJECT, "Demo", "A demo project")
}

pub fn engine_with(
    graph: WorkflowGraph,
    agents: Vec<Arc<dyn Agent>>,
    config: EngineConfig,
) -> (Arc<ExecutionEngine>, Arc<InMemoryWorkflowStore>) {
    let store = Arc::new(InMemoryWorkflowStore::new());
    store.insert(project(), graph);
    let registry = Arc::new(AgentRegistry::new());
    for agent in agents {
        registry.register(agent);
    }
    let engine = Arc::new(ExecutionEngine::new(store.clone(), registry, config));
    (engine, store)
}

pub async fn run_to_end(engine: &ExecutionEngine) -> ExecutionRecord {
    let id = engine.execute_workflow(PROJECT).await.unwrap();
    wait(engine, &id).await
}

pub async fn wait(engine: &ExecutionEngine, execution_id: &str) -> ExecutionRecord {
    tokio::time::timeout(Duration::from_secs(5), engine.wait_for_completion(execution_id))
        .await
        .expect("execution did not finish in time")
        .unwrap()
}

/// Node execution
///
/// Runs a single workflow node to a terminal outcome: structural pass-through for
/// input/output nodes, otherwise registry lookup, configuration parsing, context
/// validation, circuit breaker admission and the retry loop around the agent call.
/// Every agent attempt is reported to the monitor, the breaker and the error history.

use crate::agents::registry::AgentRegistry;
use crate::agents::traits::Agent;
use crate::agents::types::{keys, AgentConfig, AgentContext, AgentResult, ConversationTurn};
use crate::error::EngineError;
use crate::health::monitor::AgentMonitor;
use crate::health::recovery::{failure_from_message, Admission, Classification, ErrorKind, ErrorRecoveryManager, Severity};
use crate::project::Project;
use crate::runtime::execution::{NodeError, NodeOutcome};
use crate::workflow::types::{NodeRole, WorkflowNode};
use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything needed to run one node
#[derive(Debug, Clone)]
pub struct NodeRequest {
    pub execution_id: String,
    pub node: WorkflowNode,
    pub project: Arc<Project>,
    /// Completed predecessors in declaration order
    pub upstream: Vec<(String, AgentResult)>,
    /// Earlier exchanges with the same agent in this execution
    pub history: Vec<ConversationTurn>,
    pub cancel: CancellationToken,
}

/// Terminal outcome plus what the engine needs to carry forward
#[derive(Debug, Clone)]
pub struct NodeRun {
    pub outcome: NodeOutcome,
    /// Set for failures; drives escalation
    pub classification: Option<Classification>,
    /// `(user, assistant)` pair to append to the agent's history
    pub exchange: Option<(ConversationTurn, ConversationTurn)>,
}

impl NodeRun {
    fn completed(agent: Option<String>, result: AgentResult, attempts: u32) -> Self {
        Self {
            outcome: NodeOutcome::completed(agent, result, attempts),
            classification: None,
            exchange: None,
        }
    }

    fn failed(
        agent: Option<String>,
        result: Option<AgentResult>,
        classification: Classification,
        message: String,
        attempts: u32,
    ) -> Self {
        Self {
            outcome: NodeOutcome::failed(agent, result, NodeError::new(classification, message), attempts),
            classification: Some(classification),
            exchange: None,
        }
    }
}

#[derive(Debug)]
pub struct NodeExecutor {
    registry: Arc<AgentRegistry>,
    monitor: Arc<AgentMonitor>,
    recovery: Arc<ErrorRecoveryManager>,
}

impl NodeExecutor {
    pub fn new(registry: Arc<AgentRegistry>, monitor: Arc<AgentMonitor>, recovery: Arc<ErrorRecoveryManager>) -> Self {
        Self {
            registry,
            monitor,
            recovery,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Run a node to a terminal outcome; never fails past this boundary
    pub async fn run(&self, request: NodeRequest) -> NodeRun {
        match request.node.role() {
            NodeRole::Input => self.run_input(&request),
            NodeRole::Output => self.run_output(&request),
            NodeRole::Agent(tag) => self.run_agent(&request, &tag).await,
        }
    }

    fn run_input(&self, request: &NodeRequest) -> NodeRun {
        let text = match AgentConfig::from_params(&request.node.effective_params()) {
            Ok(config) => config.resolved_user_input(),
            Err(e) => return self.reject(None, e),
        };
        let text = if text.trim().is_empty() { request.project.description.clone() } else { text };
        tracing::debug!("📥 Input node '{}' passes through {} chars", request.node.id, text.len());
        NodeRun::completed(None, AgentResult::success("input", text, 0.0), 0)
    }

    fn run_output(&self, request: &NodeRequest) -> NodeRun {
        let joined = request
            .upstream
            .iter()
            .map(|(_, result)| result.output.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut result = AgentResult::success("output", joined, 0.0);
        result.metadata.insert(
            "sources".to_string(),
            json!(request.upstream.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>()),
        );
        NodeRun::completed(None, result, 0)
    }

    /// Record a pre-dispatch failure and turn it into a failed run
    fn reject(&self, agent: Option<&str>, error: EngineError) -> NodeRun {
        let classification = self.recovery.record_error(&error, agent);
        NodeRun::failed(agent.map(str::to_string), None, classification, error.to_string(), 0)
    }

    async fn run_agent(&self, request: &NodeRequest, tag: &str) -> NodeRun {
        let agent = match self.registry.resolve(tag) {
            Ok(agent) => agent,
            Err(e) => return self.reject(Some(tag), e),
        };
        let name = agent.name().to_string();

        let config = match AgentConfig::from_params(&request.node.effective_params()) {
            Ok(config) => config,
            Err(e) => return self.reject(Some(&name), e),
        };

        let context = build_context(request, config);
        if !agent.validate(&context) {
            let field = context.missing_required_field().unwrap_or("context");
            let error = EngineError::ValidationFailure(format!("missing required context field: {}", field));
            return self.reject(Some(&name), error);
        }

        let mut run = self.dispatch(agent.as_ref(), &name, &context, &request.cancel).await;
        if run.outcome.output().is_some() {
            if let Some(result) = &run.outcome.result {
                run.exchange = Some((
                    ConversationTurn::user(context.user_input.clone()),
                    ConversationTurn::assistant(result.output.clone()),
                ));
            }
        }
        run
    }

    /// Breaker admission plus the retry loop
    async fn dispatch(&self, agent: &dyn Agent, name: &str, context: &AgentContext, cancel: &CancellationToken) -> NodeRun {
        let breakers = self.recovery.breakers();
        let mut attempt: u32 = 0;
        let mut last_failure: Option<NodeRun> = None;

        loop {
            let rejection = match breakers.try_acquire(name) {
                Admission::Allowed | Admission::Trial => None,
                Admission::Rejected { retry_after } => Some(format!(
                    "circuit open for agent {}; retry after {}ms",
                    name,
                    retry_after.as_millis()
                )),
                Admission::TrialInFlight => Some(format!("circuit half-open for agent {}; trial call in flight", name)),
            };
            if let Some(message) = rejection {
                if let Some(failure) = last_failure.take() {
                    return failure;
                }
                let classification = Classification { kind: ErrorKind::CircuitOpen, severity: Severity::High };
                self.recovery.record(classification, message.clone(), Some(name));
                return NodeRun::failed(Some(name.to_string()), None, classification, message, 0);
            }

            let attempts = attempt + 1;
            tracing::debug!(agent = name, attempt = attempts, "🤖 Invoking agent");

            let call = AssertUnwindSafe(agent.execute(context)).catch_unwind().await;
            let result = match call {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => return self.internal_fault(name, format!("agent {} raised: {}", name, e), attempts),
                Err(_) => return self.internal_fault(name, format!("agent {} panicked", name), attempts),
            };

            self.monitor.record(name, &result);
            if result.success {
                breakers.record_success(name);
                return NodeRun::completed(Some(name.to_string()), result, attempts);
            }
            breakers.record_failure(name);

            let error = failure_from_message(result.error.as_deref().unwrap_or("agent reported failure"));
            let classification = self.recovery.record_error(&error, Some(name));
            let retry = self.recovery.should_retry(&classification, attempt);
            let failure = NodeRun::failed(Some(name.to_string()), Some(result), classification, error.to_string(), attempts);

            if !retry {
                return failure;
            }

            let delay = self.recovery.backoff(attempt);
            tracing::info!("🔁 Retrying agent {} in {:?} (attempt {} failed)", name, delay, attempts);
            tokio::select! {
                _ = cancel.cancelled() => return failure,
                _ = tokio::time::sleep(delay) => {}
            }
            last_failure = Some(failure);
            attempt += 1;
        }
    }

    fn internal_fault(&self, name: &str, message: String, attempts: u32) -> NodeRun {
        self.monitor.record(name, &AgentResult::failure(name, message.clone(), 0.0));
        self.recovery.breakers().record_failure(name);
        let error = EngineError::InternalFault(message);
        let classification = self.recovery.record_error(&error, Some(name));
        NodeRun::failed(Some(name.to_string()), None, classification, error.to_string(), attempts)
    }

    /// Fault outside any agent call, e.g. a panic in the node task itself
    pub fn engine_fault(&self, message: String) -> NodeRun {
        self.reject(None, EngineError::InternalFault(message))
    }
}

/// Fresh per-node context with upstream outputs merged under well-known keys
fn build_context(request: &NodeRequest, config: AgentConfig) -> AgentContext {
    let mut outputs = Map::new();
    let mut upstream_metadata = Map::new();
    for (node_id, result) in &request.upstream {
        outputs.insert(node_id.clone(), Value::String(result.output.clone()));
        upstream_metadata.insert(node_id.clone(), Value::Object(result.metadata.clone()));
    }

    let mut metadata = Map::new();
    if let Some((_, last)) = request.upstream.last() {
        metadata.insert(keys::PREVIOUS_OUTPUT.to_string(), Value::String(last.output.clone()));
    }
    metadata.insert(keys::UPSTREAM_OUTPUTS.to_string(), Value::Object(outputs));
    metadata.insert(keys::UPSTREAM_METADATA.to_string(), Value::Object(upstream_metadata));
    metadata.insert(keys::NODE_ID.to_string(), Value::String(request.node.id.clone()));
    metadata.insert(keys::EXECUTION_ID.to_string(), Value::String(request.execution_id.clone()));

    AgentContext {
        project_id: request.project.id.clone(),
        project_name: request.project.name.clone(),
        project_description: request.project.description.clone(),
        user_input: config.resolved_user_input(),
        metadata,
        conversation_history: request.history.clone(),
        config,
    }
}

/// Workflow execution engine
///
/// Loads a project's graph, validates it into an `ExecutionPlan`, allocates an
/// execution record and drives the run in a background task. Independent branches
/// run concurrently on a `JoinSet`; a node is dispatched only once every
/// predecessor is terminal. Status is exposed as snapshots and as a broadcast
/// event stream.

use crate::agents::registry::AgentRegistry;
use crate::agents::types::{AgentResult, ConversationTurn};
use crate::config::{EngineConfig, EscalationPolicy};
use crate::error::{EngineError, EngineResult};
use crate::health::recovery::should_escalate;
use crate::health::{AgentMonitor, ErrorRecoveryManager, HealthReport};
use crate::project::Project;
use crate::runtime::execution::{ExecutionEvent, ExecutionRecord, ExecutionStatus, ExecutionStore, NodeOutcome, NodeStatus};
use crate::runtime::executor::{NodeExecutor, NodeRequest, NodeRun};
use crate::runtime::scheduler::DependencyTracker;
use crate::workflow::storage::WorkflowStore;
use crate::workflow::types::NodeRole;
use crate::workflow::ExecutionPlan;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type Cancellations = Arc<Mutex<HashMap<String, CancellationToken>>>;

fn lock(cancellations: &Cancellations) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    cancellations.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Orchestrates workflow executions across projects
pub struct ExecutionEngine {
    store: Arc<dyn WorkflowStore>,
    registry: Arc<AgentRegistry>,
    executor: Arc<NodeExecutor>,
    executions: Arc<ExecutionStore>,
    monitor: Arc<AgentMonitor>,
    recovery: Arc<ErrorRecoveryManager>,
    config: EngineConfig,
    cancellations: Cancellations,
}

impl ExecutionEngine {
    /// Build the engine and its health components from an explicit registry
    pub fn new(store: Arc<dyn WorkflowStore>, registry: Arc<AgentRegistry>, config: EngineConfig) -> Self {
        let monitor = Arc::new(AgentMonitor::new(config.monitor.clone()));
        let recovery = Arc::new(ErrorRecoveryManager::new(config.recovery.clone()));
        let executor = Arc::new(NodeExecutor::new(registry.clone(), monitor.clone(), recovery.clone()));
        let executions = Arc::new(ExecutionStore::new(config.event_capacity(), config.retained_executions()));

        tracing::info!("⚙️ Execution engine ready with {} registered agent(s)", registry.len());

        Self {
            store,
            registry,
            executor,
            executions,
            monitor,
            recovery,
            config,
            cancellations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    pub fn recovery(&self) -> &Arc<ErrorRecoveryManager> {
        &self.recovery
    }

    /// Validate the project's workflow and start running it in the background
    ///
    /// Graph errors are returned here and no record is created.
    pub async fn execute_workflow(&self, project_id: &str) -> EngineResult<String> {
        tracing::info!("🚀 Execution requested for project: {}", project_id);

        let graph = self
            .store
            .get_workflow(project_id)
            .await
            .map_err(|e| EngineError::InternalFault(format!("failed to load workflow: {}", e)))?
            .ok_or_else(|| EngineError::GraphNotFound(project_id.to_string()))?;
        let project = self
            .store
            .get_project(project_id)
            .await
            .map_err(|e| EngineError::InternalFault(format!("failed to load project: {}", e)))?
            .ok_or_else(|| EngineError::GraphNotFound(project_id.to_string()))?;

        let plan = ExecutionPlan::compile(graph).inspect_err(|e| {
            tracing::warn!("❌ Rejected workflow for project {}: {}", project_id, e);
        })?;

        let record = self.executions.create(project_id);
        let execution_id = record.execution_id.clone();
        let cancel = CancellationToken::new();
        lock(&self.cancellations).insert(execution_id.clone(), cancel.clone());

        let run = Run {
            execution_id: execution_id.clone(),
            plan,
            project: Arc::new(project),
            executor: self.executor.clone(),
            executions: self.executions.clone(),
            escalation: self.config.escalation.clone(),
            cancel,
            cancellations: self.cancellations.clone(),
        };
        tokio::spawn(run.drive());

        tracing::info!("📋 Execution {} created for project {}", execution_id, project_id);
        Ok(execution_id)
    }

    /// Consistent point-in-time snapshot of an execution
    pub fn get_execution_status(&self, execution_id: &str) -> EngineResult<ExecutionRecord> {
        self.executions.snapshot(execution_id)
    }

    /// Stop dispatching and mark the execution cancelled
    ///
    /// In-flight agent calls finish in the background; their results are dropped.
    /// Cancelling a finished execution leaves it untouched.
    pub fn cancel_execution(&self, execution_id: &str) -> EngineResult<ExecutionRecord> {
        let snapshot = self.executions.cancel(execution_id)?;
        if let Some(token) = lock(&self.cancellations).remove(execution_id) {
            token.cancel();
            tracing::info!("🛑 Execution {} cancelled", execution_id);
        }
        Ok(snapshot)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.executions.subscribe()
    }

    /// Resolve once the execution reaches a terminal status
    pub async fn wait_for_completion(&self, execution_id: &str) -> EngineResult<ExecutionRecord> {
        let mut rx = self.subscribe();
        loop {
            let snapshot = self.get_execution_status(execution_id)?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            match rx.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return self.get_execution_status(execution_id),
            }
        }
    }

    pub fn health_report(&self) -> HealthReport {
        HealthReport::build(&self.monitor, &self.recovery, &self.config.health)
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("registry", &self.registry)
            .field("executions", &self.executions.len())
            .finish()
    }
}

/// State owned by one background run
struct Run {
    execution_id: String,
    plan: ExecutionPlan,
    project: Arc<Project>,
    executor: Arc<NodeExecutor>,
    executions: Arc<ExecutionStore>,
    escalation: EscalationPolicy,
    cancel: CancellationToken,
    cancellations: Cancellations,
}

/// Accumulated per-run data handed to later nodes
#[derive(Default)]
struct Progress {
    completed: HashMap<String, AgentResult>,
    histories: HashMap<String, Vec<ConversationTurn>>,
    agent_successes: usize,
    /// Node that escalated and its error message
    escalated: Option<(String, String)>,
    running: bool,
}

impl Run {
    async fn drive(self) {
        let id = self.execution_id.clone();
        let started = std::time::Instant::now();
        let mut tracker = DependencyTracker::new(&self.plan);
        let mut tasks: JoinSet<(String, NodeRun)> = JoinSet::new();
        let mut progress = Progress::default();

        tracing::info!(execution_id = %id, "🔄 Running {} node(s)", self.plan.len());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if progress.escalated.is_none() {
                let advance = tracker.advance();
                for (node_id, cause) in advance.skipped {
                    tracing::info!(execution_id = %id, node_id = %node_id, "⏭️ Skipping node, upstream '{}' did not complete", cause);
                    self.executions.record_node(&id, &node_id, NodeOutcome::skipped(cause));
                }
                for node_id in advance.ready {
                    self.dispatch(node_id, &mut progress, &mut tasks);
                }
            }

            if tasks.is_empty() {
                break;
            }

            let joined = tokio::select! {
                _ = self.cancel.cancelled() => break,
                joined = tasks.join_next() => joined,
            };

            match joined {
                None => break,
                Some(Ok((node_id, run))) => {
                    if self.cancel.is_cancelled() {
                        tracing::debug!(execution_id = %id, node_id = %node_id, "🗑️ Discarding result of cancelled execution");
                        break;
                    }
                    self.absorb(node_id, run, &mut tracker, &mut progress);
                }
                Some(Err(join_error)) => {
                    tracing::error!(execution_id = %id, "❌ Node task aborted: {}", join_error);
                    progress
                        .escalated
                        .get_or_insert_with(|| (String::new(), format!("node task aborted: {}", join_error)));
                }
            }
        }

        if self.cancel.is_cancelled() {
            // In-flight calls finish on their own; results are dropped
            tasks.detach_all();
        } else {
            self.finish(&mut tracker, &progress, started.elapsed());
        }
        lock(&self.cancellations).remove(&id);
    }

    fn dispatch(&self, node_id: String, progress: &mut Progress, tasks: &mut JoinSet<(String, NodeRun)>) {
        let Some(node) = self.plan.node(&node_id).cloned() else {
            return;
        };

        if !progress.running {
            progress.running = self.executions.mark_running(&self.execution_id);
        }

        let agent = match node.role() {
            NodeRole::Agent(tag) => self.executor.registry().resolve(&tag).ok().map(|a| a.name().to_string()),
            NodeRole::Input | NodeRole::Output => None,
        };
        let history = agent
            .as_ref()
            .and_then(|name| progress.histories.get(name).cloned())
            .unwrap_or_default();
        let upstream = self
            .plan
            .predecessors(&node_id)
            .into_iter()
            .filter_map(|pred| progress.completed.get(&pred).map(|result| (pred, result.clone())))
            .collect();

        tracing::info!(execution_id = %self.execution_id, node_id = %node_id, "📍 Dispatching node (kind: {})", node.kind);
        self.executions.node_started(&self.execution_id, &node_id, agent);

        let request = NodeRequest {
            execution_id: self.execution_id.clone(),
            node,
            project: self.project.clone(),
            upstream,
            history,
            cancel: self.cancel.clone(),
        };
        let executor = self.executor.clone();
        tasks.spawn(async move {
            let run = match AssertUnwindSafe(executor.run(request)).catch_unwind().await {
                Ok(run) => run,
                Err(_) => executor.engine_fault(format!("node {} panicked", node_id)),
            };
            (node_id, run)
        });
    }

    fn absorb(&self, node_id: String, run: NodeRun, tracker: &mut DependencyTracker, progress: &mut Progress) {
        let outcome = run.outcome;
        tracker.complete(&node_id, outcome.status);

        if outcome.status == NodeStatus::Completed {
            if let Some(result) = &outcome.result {
                progress.completed.insert(node_id.clone(), result.clone());
            }
            if outcome.agent.is_some() {
                progress.agent_successes += 1;
            }
            tracing::info!(execution_id = %self.execution_id, node_id = %node_id, "✅ Node completed");
        } else if let Some(error) = &outcome.error {
            tracing::warn!(execution_id = %self.execution_id, node_id = %node_id, "❌ Node failed: {}", error.message);
        }

        if let (Some(agent), Some((user, assistant))) = (&outcome.agent, run.exchange) {
            progress.histories.entry(agent.clone()).or_default().extend([user, assistant]);
        }

        if let (Some(classification), Some(error)) = (&run.classification, &outcome.error) {
            if progress.escalated.is_none() && should_escalate(classification, &self.escalation) {
                tracing::error!(
                    execution_id = %self.execution_id,
                    node_id = %node_id,
                    "🚨 Escalating {:?} failure, stopping dispatch",
                    classification.severity
                );
                progress.escalated = Some((node_id.clone(), error.message.clone()));
            }
        }

        self.executions.record_node(&self.execution_id, &node_id, outcome);
    }

    fn finish(&self, tracker: &mut DependencyTracker, progress: &Progress, elapsed: std::time::Duration) {
        let id = &self.execution_id;

        let (status, error) = if let Some((failed_node, message)) = &progress.escalated {
            // Whatever was not dispatched will never run
            let advance = tracker.advance();
            for (node_id, cause) in advance.skipped {
                self.executions.record_node(id, &node_id, NodeOutcome::skipped(cause));
            }
            for node_id in advance.ready.into_iter().chain(tracker.undispatched()) {
                self.executions.record_node(id, &node_id, NodeOutcome::skipped(failed_node.clone()));
            }
            let error = if failed_node.is_empty() {
                message.clone()
            } else {
                format!("node '{}' failed: {}", failed_node, message)
            };
            (ExecutionStatus::Failed, Some(error))
        } else if progress.agent_successes == 0 && self.escalation.fail_when_nothing_succeeds {
            (ExecutionStatus::Failed, Some("no node completed successfully".to_string()))
        } else {
            (ExecutionStatus::Completed, None)
        };

        self.executions.mark_running(id);
        if self.executions.finish(id, status, error) {
            tracing::info!(execution_id = %id, "🎉 Execution finished as {:?} in {:?}", status, elapsed);
        }
    }
}

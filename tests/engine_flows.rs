//! End-to-end engine scenarios over the in-memory store

mod common;

use common::{engine_with, node, run_to_end, wait, Scripted, PROJECT};
use flynt_orchestrator::agents::{keys, Agent, AgentKind};
use flynt_orchestrator::config::{EngineConfig, EscalationPolicy, RecoveryConfig};
use flynt_orchestrator::error::EngineError;
use flynt_orchestrator::health::{BreakerStatus, ErrorKind, Severity};
use flynt_orchestrator::project::Project;
use flynt_orchestrator::runtime::{ExecutionEvent, ExecutionStatus, NodeStatus};
use flynt_orchestrator::workflow::{WorkflowEdge, WorkflowGraph, WorkflowNode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;

fn no_retries() -> EngineConfig {
    EngineConfig {
        recovery: RecoveryConfig {
            max_retries: 0,
            ..RecoveryConfig::default()
        },
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn cyclic_graph_is_rejected_without_a_record() {
    let graph = WorkflowGraph::new(
        vec![node("a", "idea"), node("b", "coder")],
        vec![WorkflowEdge::new("e1", "a", "b"), WorkflowEdge::new("e2", "b", "a")],
    );
    let idea = Scripted::new(AgentKind::Idea, vec![Ok("ideas")]);
    let (engine, _) = engine_with(graph, vec![idea.clone()], EngineConfig::default());
    let mut events = engine.subscribe();

    let err = engine.execute_workflow(PROJECT).await.unwrap_err();
    assert!(matches!(err, EngineError::GraphCycle(_)));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(idea.calls(), 0);
}

#[tokio::test]
async fn fan_out_hands_the_same_upstream_output_to_both_branches() {
    let graph = WorkflowGraph::new(
        vec![node("a", "idea"), node("b", "coder"), node("c", "security")],
        vec![WorkflowEdge::new("e1", "a", "b"), WorkflowEdge::new("e2", "a", "c")],
    );
    let idea = Scripted::new(AgentKind::Idea, vec![Ok("three ideas")]);
    let coder = Scripted::new(AgentKind::Coder, vec![Ok("fn main() {}")]);
    let security = Scripted::new(AgentKind::Security, vec![Ok("no findings")]);
    let agents: Vec<Arc<dyn Agent>> = vec![idea.clone(), coder.clone(), security.clone()];
    let (engine, _) = engine_with(graph, agents, EngineConfig::default());

    let record = run_to_end(&engine).await;

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.node_results.len(), 3);
    for downstream in [coder.contexts(), security.contexts()] {
        assert_eq!(downstream.len(), 1);
        let context = &downstream[0];
        assert_eq!(context.metadata[keys::PREVIOUS_OUTPUT], json!("three ideas"));
        assert_eq!(context.upstream_output("a"), Some("three ideas"));
        assert_eq!(context.project_name, "Demo");
    }
    assert_eq!(idea.contexts()[0].metadata[keys::UPSTREAM_OUTPUTS], json!({}));
}

#[tokio::test]
async fn failed_root_skips_both_branches_without_escalating() {
    let graph = WorkflowGraph::new(
        vec![node("a", "idea"), node("b", "coder"), node("c", "security")],
        vec![WorkflowEdge::new("e1", "a", "b"), WorkflowEdge::new("e2", "a", "c")],
    );
    let idea = Scripted::new(AgentKind::Idea, vec![Err("HTTP 500: upstream exploded")]);
    let coder = Scripted::new(AgentKind::Coder, vec![Ok("code")]);
    let security = Scripted::new(AgentKind::Security, vec![Ok("ok")]);
    let agents: Vec<Arc<dyn Agent>> = vec![idea.clone(), coder.clone(), security.clone()];
    let (engine, _) = engine_with(graph, agents, no_retries());

    let record = run_to_end(&engine).await;

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.error, None);
    let a = &record.node_results["a"];
    assert_eq!(a.status, NodeStatus::Failed);
    assert_eq!(a.error.as_ref().unwrap().kind, ErrorKind::Backend);
    for id in ["b", "c"] {
        assert_eq!(record.node_results[id].status, NodeStatus::Skipped);
        assert_eq!(record.node_results[id].skipped_because.as_deref(), Some("a"));
    }
    assert_eq!(coder.calls() + security.calls(), 0);
}

#[tokio::test]
async fn unknown_agent_fails_its_node_but_siblings_run() {
    let graph = WorkflowGraph::new(
        vec![node("a", "ghost"), node("b", "idea"), node("c", "coder")],
        vec![WorkflowEdge::new("e1", "a", "c")],
    );
    let idea = Scripted::new(AgentKind::Idea, vec![Ok("ideas")]);
    let coder = Scripted::new(AgentKind::Coder, vec![Ok("code")]);
    let (engine, _) = engine_with(graph, vec![idea.clone(), coder.clone()], EngineConfig::default());

    let record = run_to_end(&engine).await;

    assert_eq!(record.status, ExecutionStatus::Completed);
    let ghost = &record.node_results["a"];
    assert_eq!(ghost.status, NodeStatus::Failed);
    assert_eq!(ghost.error.as_ref().unwrap().kind, ErrorKind::UnknownAgent);
    assert_eq!(record.node_results["b"].status, NodeStatus::Completed);
    assert_eq!(record.node_results["c"].status, NodeStatus::Skipped);
    assert_eq!(record.node_results["c"].skipped_because.as_deref(), Some("a"));
    assert_eq!(coder.calls(), 0);
}

#[tokio::test]
async fn missing_user_input_never_reaches_the_agent() {
    let graph = WorkflowGraph::new(vec![WorkflowNode::new("a", "coder")], vec![]);
    let coder = Scripted::new(AgentKind::Coder, vec![Ok("code")]);
    let (engine, _) = engine_with(graph, vec![coder.clone()], EngineConfig::default());

    let record = run_to_end(&engine).await;

    let outcome = &record.node_results["a"];
    assert_eq!(outcome.status, NodeStatus::Failed);
    assert_eq!(outcome.error.as_ref().unwrap().kind, ErrorKind::Validation);
    assert!(outcome.error.as_ref().unwrap().message.contains("user_input"));
    assert_eq!(coder.calls(), 0);
}

#[tokio::test]
async fn error_history_keeps_only_the_newest_entries() {
    let nodes = (0..15).map(|i| node(&format!("n{i}"), "mlops")).collect();
    let graph = WorkflowGraph::new(nodes, vec![]);
    let mlops = Scripted::new(AgentKind::Mlops, vec![Err("HTTP 502: bad gateway")]);
    let config = EngineConfig {
        recovery: RecoveryConfig {
            history_capacity: 10,
            max_retries: 0,
            breaker_threshold: 0,
            ..RecoveryConfig::default()
        },
        ..EngineConfig::default()
    };
    let (engine, _) = engine_with(graph, vec![mlops.clone()], config);

    run_to_end(&engine).await;

    assert_eq!(mlops.calls(), 15);
    let recovery = engine.recovery();
    assert_eq!(recovery.statistics().total_errors, 15);
    assert_eq!(recovery.statistics().by_kind[&ErrorKind::Backend], 15);
    assert_eq!(recovery.recent_errors(100).len(), 10);
}

#[tokio::test]
async fn breaker_short_circuits_then_admits_a_trial_after_cooldown() {
    let graph = WorkflowGraph::new(vec![node("a", "coder")], vec![]);
    let coder = Scripted::new(AgentKind::Coder, vec![Err("HTTP 503"), Err("HTTP 503"), Err("HTTP 503"), Ok("fixed")]);
    let config = EngineConfig {
        recovery: RecoveryConfig {
            max_retries: 0,
            breaker_threshold: 3,
            breaker_cooldown_ms: 150,
            ..RecoveryConfig::default()
        },
        ..EngineConfig::default()
    };
    let (engine, _) = engine_with(graph, vec![coder.clone()], config);

    for _ in 0..3 {
        let record = run_to_end(&engine).await;
        assert_eq!(record.node_results["a"].error.as_ref().unwrap().kind, ErrorKind::Backend);
    }
    assert_eq!(engine.recovery().breakers().status("coder"), BreakerStatus::Open);

    let record = run_to_end(&engine).await;
    let outcome = &record.node_results["a"];
    let error = outcome.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::CircuitOpen);
    assert_eq!(error.severity, Severity::High);
    assert_eq!(outcome.attempts, 0);
    assert_eq!(coder.calls(), 3);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let record = run_to_end(&engine).await;
    assert_eq!(record.node_results["a"].output(), Some("fixed"));
    assert_eq!(coder.calls(), 4);
    assert_eq!(engine.recovery().breakers().status("coder"), BreakerStatus::Closed);
}

#[tokio::test]
async fn success_rate_matches_observed_outcomes() {
    let graph = WorkflowGraph::new(vec![node("a", "coder")], vec![]);
    let coder = Scripted::new(AgentKind::Coder, vec![Ok("v1"), Err("HTTP 500"), Ok("v2"), Ok("v3")]);
    let (engine, _) = engine_with(graph, vec![coder.clone()], no_retries());

    for _ in 0..4 {
        run_to_end(&engine).await;
    }

    let metrics = engine.monitor().metrics("coder").unwrap();
    assert_eq!(metrics.total_executions, 4);
    assert!((metrics.success_rate - 0.75).abs() < 1e-9);
    assert!((metrics.error_rate - 0.25).abs() < 1e-9);
}

#[tokio::test]
async fn retryable_failures_are_retried_within_one_node() {
    let graph = WorkflowGraph::new(vec![node("a", "coder")], vec![]);
    let coder = Scripted::new(AgentKind::Coder, vec![Err("request timed out after 1s"), Ok("done")]);
    let config = EngineConfig {
        recovery: RecoveryConfig {
            max_retries: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            ..RecoveryConfig::default()
        },
        ..EngineConfig::default()
    };
    let (engine, _) = engine_with(graph, vec![coder.clone()], config);

    let record = run_to_end(&engine).await;

    let outcome = &record.node_results["a"];
    assert_eq!(outcome.status, NodeStatus::Completed);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(engine.recovery().statistics().by_kind[&ErrorKind::Timeout], 1);
}

#[tokio::test]
async fn escalating_failure_fails_the_execution() {
    let graph = WorkflowGraph::new(
        vec![node("a", "coder"), node("b", "idea")],
        vec![WorkflowEdge::new("e1", "a", "b")],
    );
    let coder = Scripted::new(AgentKind::Coder, vec![Err("HTTP 500")]);
    let idea = Scripted::new(AgentKind::Idea, vec![Ok("ideas")]);
    let config = EngineConfig {
        escalation: EscalationPolicy {
            escalate_at: Some(Severity::Medium),
            fail_when_nothing_succeeds: false,
        },
        ..no_retries()
    };
    let (engine, _) = engine_with(graph, vec![coder.clone(), idea.clone()], config);

    let record = run_to_end(&engine).await;

    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error.as_deref().unwrap().starts_with("node 'a' failed"));
    assert_eq!(record.node_results["b"].status, NodeStatus::Skipped);
    assert_eq!(idea.calls(), 0);
}

#[tokio::test]
async fn independent_nodes_run_concurrently() {
    let graph = WorkflowGraph::new(vec![node("a", "idea"), node("b", "coder")], vec![]);
    let idea = Scripted::slow(AgentKind::Idea, vec![Ok("ideas")], Duration::from_millis(100));
    let coder = Scripted::slow(AgentKind::Coder, vec![Ok("code")], Duration::from_millis(100));
    let (engine, _) = engine_with(graph, vec![idea.clone(), coder.clone()], EngineConfig::default());
    let mut events = engine.subscribe();

    let id = engine.execute_workflow(PROJECT).await.unwrap();
    wait(&engine, &id).await;

    let mut started = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ExecutionEvent::NodeStarted { .. } => started += 1,
            ExecutionEvent::NodeFinished { .. } => {
                assert_eq!(started, 2, "both nodes start before either finishes");
                break;
            }
            _ => {}
        }
    }
    assert_eq!(started, 2);
}

#[tokio::test]
async fn cancellation_is_terminal_and_drops_late_results() {
    let graph = WorkflowGraph::new(
        vec![node("a", "idea"), node("b", "coder")],
        vec![WorkflowEdge::new("e1", "a", "b")],
    );
    let idea = Scripted::slow(AgentKind::Idea, vec![Ok("ideas")], Duration::from_millis(200));
    let coder = Scripted::new(AgentKind::Coder, vec![Ok("code")]);
    let (engine, _) = engine_with(graph, vec![idea.clone(), coder.clone()], EngineConfig::default());
    let mut events = engine.subscribe();

    let id = engine.execute_workflow(PROJECT).await.unwrap();
    loop {
        if let ExecutionEvent::NodeStarted { node_id, .. } = events.recv().await.unwrap() {
            if node_id == "a" {
                break;
            }
        }
    }

    let snapshot = engine.cancel_execution(&id).unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Cancelled);
    assert!(snapshot.ended_at.is_some());

    tokio::time::sleep(Duration::from_millis(300)).await;

    let later = engine.get_execution_status(&id).unwrap();
    assert_eq!(later.status, ExecutionStatus::Cancelled);
    assert!(later.node_results.is_empty());
    assert_eq!(coder.calls(), 0);
    assert_eq!(engine.cancel_execution(&id).unwrap(), later);
}

#[tokio::test]
async fn finished_snapshots_are_byte_identical() {
    let graph = WorkflowGraph::new(vec![node("a", "idea")], vec![]);
    let idea = Scripted::new(AgentKind::Idea, vec![Ok("ideas")]);
    let (engine, _) = engine_with(graph, vec![idea], EngineConfig::default());

    let record = run_to_end(&engine).await;

    let first = serde_json::to_vec(&engine.get_execution_status(&record.execution_id).unwrap()).unwrap();
    let second = serde_json::to_vec(&engine.get_execution_status(&record.execution_id).unwrap()).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn unknown_execution_is_not_found() {
    let (engine, _) = engine_with(WorkflowGraph::default(), vec![], EngineConfig::default());
    assert_eq!(
        engine.get_execution_status("nope").unwrap_err(),
        EngineError::ExecutionNotFound("nope".into())
    );
    assert!(engine.cancel_execution("nope").is_err());
}

#[tokio::test]
async fn input_and_output_nodes_frame_the_agents() {
    let graph = WorkflowGraph::new(
        vec![
            WorkflowNode::new("in", "input").with_param("user_input", json!("Build a CLI")),
            WorkflowNode::new("idea", "agent").with_param("agentType", json!("idea")).with_param("prompt", json!("brainstorm")),
            node("code", "coder"),
            WorkflowNode::new("out", "output"),
        ],
        vec![
            WorkflowEdge::new("e1", "in", "idea"),
            WorkflowEdge::new("e2", "in", "code"),
            WorkflowEdge::new("e3", "idea", "out"),
            WorkflowEdge::new("e4", "code", "out"),
        ],
    );
    let idea = Scripted::new(AgentKind::Idea, vec![Ok("ideas")]);
    let coder = Scripted::new(AgentKind::Coder, vec![Ok("code")]);
    let (engine, _) = engine_with(graph, vec![idea.clone(), coder.clone()], EngineConfig::default());

    let record = run_to_end(&engine).await;

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.node_results["in"].output(), Some("Build a CLI"));
    assert_eq!(idea.contexts()[0].upstream_output("in"), Some("Build a CLI"));
    assert_eq!(record.node_results["out"].output(), Some("ideas\n\ncode"));
}

/// Every event already published, in order
fn drain(events: &mut Receiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn statuses(events: &[ExecutionEvent], execution_id: &str) -> Vec<ExecutionStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::StatusChanged { execution_id: id, status } if id == execution_id => Some(*status),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn new_execution_stays_pending_until_its_first_dispatch() {
    let graph = WorkflowGraph::new(vec![node("a", "idea")], vec![]);
    let idea = Scripted::slow(AgentKind::Idea, vec![Ok("ideas")], Duration::from_millis(100));
    let (engine, _) = engine_with(graph, vec![idea.clone()], EngineConfig::default());
    let mut events = engine.subscribe();

    // The background run is not polled before this task yields
    let id = engine.execute_workflow(PROJECT).await.unwrap();
    assert_eq!(engine.get_execution_status(&id).unwrap().status, ExecutionStatus::Pending);

    loop {
        if let ExecutionEvent::NodeStarted { .. } = events.recv().await.unwrap() {
            break;
        }
    }
    assert_eq!(engine.get_execution_status(&id).unwrap().status, ExecutionStatus::Running);

    let record = wait(&engine, &id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);

    assert_eq!(statuses(&drain(&mut events), &id), vec![ExecutionStatus::Completed]);
}

#[tokio::test]
async fn status_events_walk_the_state_machine_in_order() {
    let graph = WorkflowGraph::new(vec![node("a", "idea")], vec![]);
    let idea = Scripted::new(AgentKind::Idea, vec![Ok("ideas")]);
    let (engine, _) = engine_with(graph, vec![idea], EngineConfig::default());
    let mut events = engine.subscribe();

    let record = run_to_end(&engine).await;

    assert_eq!(
        statuses(&drain(&mut events), &record.execution_id),
        vec![ExecutionStatus::Pending, ExecutionStatus::Running, ExecutionStatus::Completed]
    );
}

#[tokio::test]
async fn executions_of_different_projects_run_side_by_side() {
    let graph = WorkflowGraph::new(vec![node("a", "idea")], vec![]);
    let idea = Scripted::slow(AgentKind::Idea, vec![Ok("ideas")], Duration::from_millis(150));
    let (engine, store) = engine_with(graph.clone(), vec![idea.clone()], EngineConfig::default());
    store.insert(Project::new("p2", "Second", "Another project"), graph);
    let mut events = engine.subscribe();

    let first = engine.execute_workflow(PROJECT).await.unwrap();
    let second = engine.execute_workflow("p2").await.unwrap();
    assert_ne!(first, second);

    let (one, two) = tokio::join!(wait(&engine, &first), wait(&engine, &second));
    assert_eq!(one.status, ExecutionStatus::Completed);
    assert_eq!(two.status, ExecutionStatus::Completed);
    assert_eq!(one.project_id, PROJECT);
    assert_eq!(two.project_id, "p2");

    let mut started = Vec::new();
    for event in drain(&mut events) {
        match event {
            ExecutionEvent::NodeStarted { execution_id, .. } => started.push(execution_id),
            ExecutionEvent::NodeFinished { .. } => break,
            _ => {}
        }
    }
    assert_eq!(started.len(), 2, "both executions dispatch before either node finishes");
    assert!(started.contains(&first) && started.contains(&second));

    let mut projects: Vec<String> = idea.contexts().into_iter().map(|c| c.project_id).collect();
    projects.sort();
    assert_eq!(projects, vec!["p1", "p2"]);
}

#[tokio::test]
async fn cancel_before_first_dispatch_goes_straight_to_cancelled() {
    let graph = WorkflowGraph::new(vec![node("a", "idea")], vec![]);
    let idea = Scripted::new(AgentKind::Idea, vec![Ok("ideas")]);
    let (engine, _) = engine_with(graph, vec![idea.clone()], EngineConfig::default());
    let mut events = engine.subscribe();

    let id = engine.execute_workflow(PROJECT).await.unwrap();
    let snapshot = engine.cancel_execution(&id).unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Cancelled);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let seen = drain(&mut events);
    assert_eq!(statuses(&seen, &id), vec![ExecutionStatus::Pending, ExecutionStatus::Cancelled]);
    assert!(!seen.iter().any(|e| matches!(e, ExecutionEvent::NodeStarted { .. })));
    assert_eq!(idea.calls(), 0);
    assert!(engine.get_execution_status(&id).unwrap().node_results.is_empty());
}

#[tokio::test]
async fn oldest_finished_executions_are_forgotten() {
    let graph = WorkflowGraph::new(vec![node("a", "idea")], vec![]);
    let idea = Scripted::new(AgentKind::Idea, vec![Ok("ideas")]);
    let config = EngineConfig { retained_executions: 1, ..EngineConfig::default() };
    let (engine, _) = engine_with(graph, vec![idea], config);

    let first = run_to_end(&engine).await;
    let second = run_to_end(&engine).await;

    assert_eq!(
        engine.get_execution_status(&first.execution_id).unwrap_err(),
        EngineError::ExecutionNotFound(first.execution_id.clone())
    );
    assert_eq!(engine.get_execution_status(&second.execution_id).unwrap(), second);
}

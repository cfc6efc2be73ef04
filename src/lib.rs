/// Flynt orchestrator: multi-agent workflow execution engine
///
/// Runs project workflow graphs of AI agents concurrently in dependency order,
/// with per-agent health monitoring, retries, circuit breaking, and live status
/// events.

// Core configuration and setup
pub mod config;

// Engine error taxonomy
pub mod error;

// Projects the workflows belong to
pub mod project;

// Workflow graph model, validation and persistence
pub mod workflow;

// Agent kinds, contexts, results, the registry and the built-in agents
pub mod agents;

// Health monitoring, error classification and recovery policy
pub mod health;

// Runtime execution engine - petgraph DAG execution and node orchestration
pub mod runtime;

// HTTP API layer - projects, executions, health and the event stream
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use agents::{Agent, AgentContext, AgentKind, AgentRegistry, AgentResult};
pub use error::{EngineError, EngineResult};
pub use project::Project;
pub use runtime::{ExecutionEngine, ExecutionRecord, ExecutionStatus};
pub use server::start_server;
pub use workflow::{WorkflowEdge, WorkflowGraph, WorkflowNode};

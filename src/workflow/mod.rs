/// Workflow Graph Model
///
/// This module handles the project workflow graph consumed by the engine:
/// - Type definitions (WorkflowGraph, WorkflowNode, WorkflowEdge)
/// - Validation and deterministic ordering with petgraph
/// - The persistence collaborator the engine loads graphs from

// Core workflow type definitions
pub mod types;

// Validation, cycle detection and execution order
pub mod graph;

// Persistence collaborator (SQLite and in-memory)
pub mod storage;

// Re-export commonly used types
pub use graph::ExecutionPlan;
pub use storage::{InMemoryWorkflowStore, SqliteWorkflowStore, WorkflowStore};
pub use types::{NodeRole, Position, WorkflowEdge, WorkflowGraph, WorkflowNode};

/// Engine error taxonomy
///
/// Every failure the orchestration engine can surface. Graph-level errors abort an
/// execute request before any record exists; node-level errors are recorded against
/// the node and routed through the recovery manager.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// No workflow (or no project) stored for the requested project id
    #[error("Workflow not found for project: {0}")]
    GraphNotFound(String),

    /// The edge relation contains a cycle; execution order is undefined
    #[error("Workflow graph contains a cycle through node: {0}")]
    GraphCycle(String),

    /// Duplicate node id or an edge pointing at a missing node
    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    #[error("Unknown agent kind: {0}")]
    UnknownAgentKind(String),

    /// Context or node configuration rejected before any backend call
    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    #[error("Backend call failed: {0}")]
    BackendFailure(String),

    #[error("Backend call timed out: {0}")]
    Timeout(String),

    /// Unexpected fault; aborts the whole execution
    #[error("Internal fault: {0}")]
    InternalFault(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Runtime Execution Engine
///
/// This module runs workflow graphs:
/// - Execution records, the status state machine and the event bus
/// - Dependency tracking with failure cascades
/// - Per-node dispatch with retries and circuit breaking
/// - The engine that ties them together for concurrent executions

// Execution records and broadcast status events
pub mod execution;

// Ready/skip decisions for one execution
pub mod scheduler;

// Single-node execution with retry and breaker policy
pub mod executor;

// Top-level orchestration
pub mod engine;

// Re-export main types
pub use engine::ExecutionEngine;
pub use execution::{ExecutionEvent, ExecutionRecord, ExecutionStatus, NodeError, NodeOutcome, NodeStatus};
pub use executor::NodeExecutor;

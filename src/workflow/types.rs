/// Core workflow type definitions
///
/// Defines the node/edge structures saved by the workflow editor. These types are
/// deserialized from the editor's JSON format and handed to the engine, which
/// validates them before any node runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Node type that defers the agent kind to `data.agentType`
pub const GENERIC_AGENT_NODE: &str = "agent";
/// Structural entry node: completes with its configured user input
pub const INPUT_NODE: &str = "input";
/// Structural exit node: completes with the joined outputs of its predecessors
pub const OUTPUT_NODE: &str = "output";

/// Canvas position; carried through unchanged, never interpreted by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A single unit of work in the project graph
///
/// `kind` selects the agent implementation (e.g. "coder", "validator"). The editor
/// also emits the generic "agent" type, in which case `params.agentType` carries the
/// real kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique node identifier within the graph (e.g. "research-1")
    pub id: String,
    /// Agent kind tag or one of the structural node types
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque parameter bag the agent interprets
    #[serde(rename = "data", default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub position: Position,
}

/// Dependency between two nodes: `target` runs after `source` reached a terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A complete project workflow as loaded from persistence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// Nodes in declaration order; the order breaks scheduling ties
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

/// How the engine treats a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRole {
    Input,
    Output,
    /// Dispatched to the agent registered for this (unparsed) kind tag
    Agent(String),
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            params: Map::new(),
            position: Position::default(),
        }
    }

    /// Set a parameter (builder style, mostly used by tests and seeding)
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn role(&self) -> NodeRole {
        match self.kind.as_str() {
            INPUT_NODE => NodeRole::Input,
            OUTPUT_NODE => NodeRole::Output,
            GENERIC_AGENT_NODE => {
                let tag = self
                    .params
                    .get("agentType")
                    .and_then(|v| v.as_str())
                    .unwrap_or(GENERIC_AGENT_NODE);
                NodeRole::Agent(tag.to_string())
            }
            other => NodeRole::Agent(other.to_string()),
        }
    }

    /// Parameters with a nested `config` object flattened over the top level
    pub fn effective_params(&self) -> Map<String, Value> {
        let mut merged = self.params.clone();
        if let Some(Value::Object(config)) = self.params.get("config") {
            for (key, value) in config {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged.remove("config");
        merged
    }
}

impl WorkflowEdge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: None,
            data: None,
        }
    }
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Self {
        Self { nodes, edges }
    }
}

/// Project type definitions
///
/// A project owns exactly one workflow graph. The engine only reads the fields it
/// copies into each agent context.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A project container for one agent workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Unique project identifier (e.g., "proj-analytics")
    #[serde(default)]
    pub id: String,
    /// Human-readable project name
    pub name: String,
    /// Project description handed to every agent as background
    #[serde(default)]
    pub description: String,
    /// Lifecycle status as tracked by the editor ("draft", "in_progress", ...)
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_status() -> String {
    "draft".to_string()
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            status: default_status(),
            metadata: Map::new(),
        }
    }
}

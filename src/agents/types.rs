/// Agent data types
///
/// The closed set of agent kinds, the per-node execution context, the typed node
/// configuration and the structured result every agent returns.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Agent kinds the registry can map to an implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Research and brainstorming
    Idea,
    /// Code generation and architecture
    Coder,
    /// ML pipelines and experimentation
    DataScience,
    /// Vulnerability review and compliance
    Security,
    /// Pipeline orchestration and versioning
    Mlops,
    /// Quality assurance; emits a quality score
    Validator,
}

impl AgentKind {
    pub const ALL: [AgentKind; 6] = [
        AgentKind::Idea,
        AgentKind::Coder,
        AgentKind::DataScience,
        AgentKind::Security,
        AgentKind::Mlops,
        AgentKind::Validator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Idea => "idea",
            AgentKind::Coder => "coder",
            AgentKind::DataScience => "data_science",
            AgentKind::Security => "security",
            AgentKind::Mlops => "mlops",
            AgentKind::Validator => "validator",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = EngineError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let normalized = tag.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "idea" => Ok(AgentKind::Idea),
            "coder" => Ok(AgentKind::Coder),
            "data_science" | "datascience" => Ok(AgentKind::DataScience),
            "security" => Ok(AgentKind::Security),
            "mlops" => Ok(AgentKind::Mlops),
            "validator" => Ok(AgentKind::Validator),
            _ => Err(EngineError::UnknownAgentKind(tag.to_string())),
        }
    }
}

/// One exchange in an agent's conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// "user" or "assistant"
    pub role: String,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Typed node configuration
///
/// Recognized keys:
/// - `label`: display name, last-resort user input
/// - `user_input` (`prompt`, `userInput`): the task for this node
/// - `description`: fallback user input
/// - `temperature`, `max_tokens`: forwarded to the backend
/// - `retrieval_source`: enables retrieval-augmented generation
/// - `min_quality`: validator pass threshold in 0..=1
///
/// Anything else is preserved in `extra` and never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, alias = "prompt", alias = "userInput", skip_serializing_if = "Option::is_none")]
    pub user_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, alias = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, alias = "retrievalSource", skip_serializing_if = "Option::is_none")]
    pub retrieval_source: Option<String>,
    #[serde(default, alias = "minQuality", skip_serializing_if = "Option::is_none")]
    pub min_quality: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentConfig {
    /// Parse a node's parameter bag; malformed recognized keys are a validation failure
    pub fn from_params(params: &Map<String, Value>) -> EngineResult<Self> {
        serde_json::from_value(Value::Object(params.clone()))
            .map_err(|e| EngineError::ValidationFailure(format!("invalid node configuration: {e}")))
    }

    /// The task text: explicit input, then description, then label
    pub fn resolved_user_input(&self) -> String {
        self.user_input
            .as_deref()
            .or(self.description.as_deref())
            .or(self.label.as_deref())
            .unwrap_or_default()
            .to_string()
    }
}

/// Per-node execution input, built fresh by the engine for every call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub project_id: String,
    pub project_name: String,
    pub project_description: String,
    pub user_input: String,
    /// Upstream outputs and engine metadata under well-known keys
    pub metadata: Map<String, Value>,
    /// Earlier exchanges with the same agent in this workflow run
    pub conversation_history: Vec<ConversationTurn>,
    pub config: AgentConfig,
}

/// Metadata keys the engine fills in
pub mod keys {
    pub const UPSTREAM_OUTPUTS: &str = "upstream_outputs";
    pub const UPSTREAM_METADATA: &str = "upstream_metadata";
    pub const PREVIOUS_OUTPUT: &str = "previous_output";
    pub const NODE_ID: &str = "node_id";
    pub const EXECUTION_ID: &str = "execution_id";
    pub const QUALITY_SCORE: &str = "quality_score";
}

impl AgentContext {
    /// First required field that is empty, if any
    pub fn missing_required_field(&self) -> Option<&'static str> {
        if self.project_id.trim().is_empty() {
            Some("project_id")
        } else if self.project_name.trim().is_empty() {
            Some("project_name")
        } else if self.user_input.trim().is_empty() {
            Some("user_input")
        } else {
            None
        }
    }

    /// Readable rendering used as the prompt preamble
    pub fn format(&self) -> String {
        let mut parts = vec![
            format!("Project: {}", self.project_name),
            format!("Description: {}", self.project_description),
            format!("User Input: {}", self.user_input),
        ];
        if let Some(Value::Object(outputs)) = self.metadata.get(keys::UPSTREAM_OUTPUTS) {
            for (node_id, output) in outputs {
                let text = output.as_str().map(str::to_string).unwrap_or_else(|| output.to_string());
                parts.push(format!("Output of {node_id}:\n{text}"));
            }
        }
        parts.join("\n")
    }

    pub fn upstream_output(&self, node_id: &str) -> Option<&str> {
        self.metadata
            .get(keys::UPSTREAM_OUTPUTS)
            .and_then(|outputs| outputs.get(node_id))
            .and_then(|v| v.as_str())
    }
}

/// Structured outcome of one agent invocation; immutable once produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub output: String,
    pub agent_name: String,
    /// Wall-clock seconds spent in the agent
    pub execution_time: f64,
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub intermediate_steps: Vec<String>,
}

impl AgentResult {
    pub fn success(agent_name: impl Into<String>, output: impl Into<String>, execution_time: f64) -> Self {
        Self {
            success: true,
            output: output.into(),
            agent_name: agent_name.into(),
            execution_time,
            metadata: Map::new(),
            error: None,
            intermediate_steps: Vec::new(),
        }
    }

    pub fn failure(agent_name: impl Into<String>, error: impl Into<String>, execution_time: f64) -> Self {
        Self {
            success: false,
            output: String::new(),
            agent_name: agent_name.into(),
            execution_time,
            metadata: Map::new(),
            error: Some(error.into()),
            intermediate_steps: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.intermediate_steps = steps;
        self
    }

    /// Agent-supplied quality signal in 0..=1
    pub fn quality_score(&self) -> Option<f64> {
        self.metadata.get(keys::QUALITY_SCORE).and_then(|v| v.as_f64())
    }
}

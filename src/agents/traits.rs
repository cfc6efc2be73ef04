use crate::agents::types::{AgentContext, AgentKind, AgentResult};
use async_trait::async_trait;

/// A pluggable unit of work
///
/// `execute` encodes ordinary failures (backend errors, timeouts, bad model output)
/// in a non-success `AgentResult` with `error` set. Returning `Err` is reserved for
/// faults the agent cannot explain; the engine treats those as internal faults.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    fn kind(&self) -> AgentKind;

    /// Name used for metrics, history and the breaker
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    fn description(&self) -> &str;

    fn system_prompt(&self) -> String;

    async fn execute(&self, context: &AgentContext) -> anyhow::Result<AgentResult>;

    /// Reject contexts missing a project id, project name or user input
    fn validate(&self, context: &AgentContext) -> bool {
        match context.missing_required_field() {
            Some(field) => {
                tracing::warn!("[{}] Missing required context field: {}", self.name(), field);
                false
            }
            None => true,
        }
    }
}

/// Built-in agents
///
/// One concrete type per `AgentKind`. All of them share the same generation step
/// against the LLM backend and differ in their system prompt and in how they
/// post-process the model's answer into result metadata.

use crate::agents::llm::{LlmBackend, LlmRequest, LlmResponse};
use crate::agents::registry::AgentRegistry;
use crate::agents::traits::Agent;
use crate::agents::types::{keys, AgentContext, AgentKind, AgentResult};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// One model call plus the bookkeeping every agent records
struct Generation {
    response: LlmResponse,
    elapsed: f64,
    steps: Vec<String>,
}

impl Generation {
    async fn run(backend: &dyn LlmBackend, agent: &str, system_prompt: String, context: &AgentContext) -> Self {
        let started = Instant::now();
        let mut steps = Vec::new();

        let upstream = context
            .metadata
            .get(keys::UPSTREAM_OUTPUTS)
            .and_then(|v| v.as_object())
            .map(|o| o.len())
            .unwrap_or(0);
        steps.push(format!("Built prompt with {} upstream output(s)", upstream));

        let request = LlmRequest {
            system_prompt,
            prompt: context.format(),
            history: context.conversation_history.clone(),
            temperature: context.config.temperature,
            max_tokens: context.config.max_tokens,
            retrieval_source: context.config.retrieval_source.clone(),
        };
        if let Some(source) = &request.retrieval_source {
            steps.push(format!("Grounded on retrieval source {}", source));
        }

        tracing::debug!("[{}] Generating response", agent);
        let response = backend.generate(&request).await;
        if response.success {
            steps.push(format!("Generated response ({} tokens)", response.usage.total_tokens));
        } else {
            tracing::warn!("[{}] Generation failed: {}", agent, response.error.as_deref().unwrap_or("unknown error"));
            steps.push("Generation failed".to_string());
        }

        Self {
            response,
            elapsed: started.elapsed().as_secs_f64(),
            steps,
        }
    }

    fn into_result(self, agent: &str) -> AgentResult {
        let usage = json!(self.response.usage);
        if self.response.success {
            AgentResult::success(agent, self.response.text, self.elapsed)
                .with_metadata("usage", usage)
                .with_steps(self.steps)
        } else {
            let error = self.response.error.unwrap_or_else(|| "generation failed".to_string());
            AgentResult::failure(agent, error, self.elapsed)
                .with_metadata("usage", usage)
                .with_steps(self.steps)
        }
    }
}

/// Research and brainstorming
pub struct IdeaAgent {
    backend: Arc<dyn LlmBackend>,
}

impl IdeaAgent {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Agent for IdeaAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Idea
    }

    fn description(&self) -> &str {
        "Researches the problem space and proposes feature ideas"
    }

    fn system_prompt(&self) -> String {
        "You are a product researcher. Analyse the project and propose concrete, \
         prioritised ideas. Answer with a short rationale followed by a bulleted list."
            .to_string()
    }

    async fn execute(&self, context: &AgentContext) -> anyhow::Result<AgentResult> {
        let generation = Generation::run(self.backend.as_ref(), self.name(), self.system_prompt(), context).await;
        let result = generation.into_result(self.name());
        let ideas = count_bullets(&result.output);
        Ok(result.with_metadata("ideas", json!(ideas)))
    }
}

/// Code generation and architecture
pub struct CoderAgent {
    backend: Arc<dyn LlmBackend>,
}

impl CoderAgent {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Agent for CoderAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Coder
    }

    fn description(&self) -> &str {
        "Designs the architecture and writes implementation code"
    }

    fn system_prompt(&self) -> String {
        "You are a senior software engineer. Produce a brief architecture outline and \
         the implementation in fenced code blocks. Prefer small, testable units."
            .to_string()
    }

    async fn execute(&self, context: &AgentContext) -> anyhow::Result<AgentResult> {
        let generation = Generation::run(self.backend.as_ref(), self.name(), self.system_prompt(), context).await;
        let result = generation.into_result(self.name());
        let blocks = count_code_blocks(&result.output);
        Ok(result.with_metadata("code_blocks", json!(blocks)))
    }
}

/// ML pipelines and experimentation
pub struct DataScienceAgent {
    backend: Arc<dyn LlmBackend>,
}

impl DataScienceAgent {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Agent for DataScienceAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::DataScience
    }

    fn description(&self) -> &str {
        "Plans datasets, features, models and evaluation"
    }

    fn system_prompt(&self) -> String {
        "You are a data scientist. Describe the data needed, the feature engineering, \
         candidate models and how each will be evaluated."
            .to_string()
    }

    async fn execute(&self, context: &AgentContext) -> anyhow::Result<AgentResult> {
        let generation = Generation::run(self.backend.as_ref(), self.name(), self.system_prompt(), context).await;
        Ok(generation.into_result(self.name()))
    }
}

/// Vulnerability review and compliance
pub struct SecurityAgent {
    backend: Arc<dyn LlmBackend>,
}

impl SecurityAgent {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Agent for SecurityAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Security
    }

    fn description(&self) -> &str {
        "Reviews designs and code for vulnerabilities and compliance gaps"
    }

    fn system_prompt(&self) -> String {
        "You are an application security reviewer. List each finding on its own line \
         prefixed with its severity (CRITICAL, HIGH, MEDIUM, LOW) and a remediation."
            .to_string()
    }

    async fn execute(&self, context: &AgentContext) -> anyhow::Result<AgentResult> {
        let generation = Generation::run(self.backend.as_ref(), self.name(), self.system_prompt(), context).await;
        let result = generation.into_result(self.name());
        let findings = count_serious_findings(&result.output);
        Ok(result.with_metadata("findings", json!(findings)))
    }
}

/// Pipeline orchestration and versioning
pub struct MlopsAgent {
    backend: Arc<dyn LlmBackend>,
}

impl MlopsAgent {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Agent for MlopsAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Mlops
    }

    fn description(&self) -> &str {
        "Designs deployment, monitoring and model versioning"
    }

    fn system_prompt(&self) -> String {
        "You are an MLOps engineer. Describe the training and deployment pipeline, \
         model versioning, monitoring and rollback procedure."
            .to_string()
    }

    async fn execute(&self, context: &AgentContext) -> anyhow::Result<AgentResult> {
        let generation = Generation::run(self.backend.as_ref(), self.name(), self.system_prompt(), context).await;
        Ok(generation.into_result(self.name()))
    }
}

/// Quality assurance; reports a score the monitor averages
pub struct ValidatorAgent {
    backend: Arc<dyn LlmBackend>,
}

impl ValidatorAgent {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Agent for ValidatorAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Validator
    }

    fn description(&self) -> &str {
        "Checks upstream work for correctness and scores its quality"
    }

    fn system_prompt(&self) -> String {
        "You are a QA lead. Review the upstream outputs against the project goals, \
         list the issues you find and finish with a line `SCORE: <0.0-1.0>`."
            .to_string()
    }

    async fn execute(&self, context: &AgentContext) -> anyhow::Result<AgentResult> {
        let generation = Generation::run(self.backend.as_ref(), self.name(), self.system_prompt(), context).await;
        let mut result = generation.into_result(self.name());
        if !result.success {
            return Ok(result);
        }

        let Some(score) = parse_score(&result.output) else {
            result.intermediate_steps.push("No score line found".to_string());
            return Ok(result);
        };
        result = result.with_metadata(keys::QUALITY_SCORE, json!(score));

        if let Some(min) = context.config.min_quality {
            if score < min {
                result.success = false;
                result.error = Some(format!(
                    "validation failed: quality score {:.2} below threshold {:.2}",
                    score, min
                ));
            }
        }
        Ok(result)
    }
}

/// Register one instance of every built-in agent, all sharing `backend`
pub fn register_builtin_agents(registry: &AgentRegistry, backend: Arc<dyn LlmBackend>) {
    registry.register(Arc::new(IdeaAgent::new(backend.clone())));
    registry.register(Arc::new(CoderAgent::new(backend.clone())));
    registry.register(Arc::new(DataScienceAgent::new(backend.clone())));
    registry.register(Arc::new(SecurityAgent::new(backend.clone())));
    registry.register(Arc::new(MlopsAgent::new(backend.clone())));
    registry.register(Arc::new(ValidatorAgent::new(backend)));
}

fn count_bullets(text: &str) -> usize {
    text.lines()
        .map(str::trim_start)
        .filter(|line| line.starts_with("- ") || line.starts_with("* "))
        .count()
}

fn count_code_blocks(text: &str) -> usize {
    text.lines().filter(|line| line.trim_start().starts_with("```")).count() / 2
}

fn count_serious_findings(text: &str) -> usize {
    text.lines()
        .filter(|line| line.contains("CRITICAL") || line.contains("HIGH"))
        .count()
}

/// Parse a `SCORE:` line as a fraction, percentage or `n/10` into 0..=1
fn parse_score(text: &str) -> Option<f64> {
    let line = text
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.to_ascii_uppercase().starts_with("SCORE:"))?;
    let raw = line["SCORE:".len()..].trim().trim_end_matches('.');

    let score = if let Some(pct) = raw.strip_suffix('%') {
        pct.trim().parse::<f64>().ok()? / 100.0
    } else if let Some((num, den)) = raw.split_once('/') {
        let den: f64 = den.trim().parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num.trim().parse::<f64>().ok()? / den
    } else {
        raw.parse::<f64>().ok()?
    };

    Some(score.clamp(0.0, 1.0))
}

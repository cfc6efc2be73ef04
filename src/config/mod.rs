/// Configuration management for the Flynt orchestrator
///
/// Handles server binding, storage location, the LLM backend, and every tunable
/// used by the execution engine (health thresholds, retry policy, circuit breaker,
/// escalation policy).

use crate::health::recovery::Severity;
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Language-model backend used by the built-in agents
    pub llm: LlmConfig,
    /// Execution engine tunables
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the workflow database (default: "data")
    /// Creates: {data_dir}/flynt.db
    pub data_dir: String,
}

/// OpenAI-compatible chat completion backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL, e.g. "https://api.openai.com/v1"
    pub base_url: String,
    /// Bearer token; empty disables the Authorization header
    pub api_key: String,
    pub model: String,
    /// Per-request timeout enforced by the HTTP client
    pub timeout_secs: u64,
}

/// Tunables for the execution engine and its health components
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub monitor: MonitorConfig,
    pub recovery: RecoveryConfig,
    pub escalation: EscalationPolicy,
    pub health: HealthThresholds,
    /// Capacity of the execution event broadcast channel
    pub event_capacity: usize,
    /// Finished executions kept queryable before the oldest are dropped
    pub retained_executions: usize,
}

/// Agent health classification policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Trailing window (number of executions) used for the error rate
    pub window_size: usize,
    /// Executions required before an agent leaves `unknown`
    pub min_samples: u64,
    /// Error rate at or below which an agent is `healthy`
    pub healthy_max_error_rate: f64,
    /// Error rate at or below which an agent is `degraded`; above is `unhealthy`
    pub degraded_max_error_rate: f64,
}

/// Retry, circuit breaker and error history policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Error history ring buffer capacity
    pub history_capacity: usize,
    /// Retries after the first attempt for retryable failures
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Consecutive failures that trip an agent's breaker
    pub breaker_threshold: u32,
    /// How long a tripped breaker rejects dispatches
    pub breaker_cooldown_ms: u64,
    /// Rolling window for the "recent errors" statistic
    pub error_window_secs: i64,
}

/// When a node failure fails the whole execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Failures at or above this severity escalate; `None` never escalates
    /// (internal faults still do)
    pub escalate_at: Option<Severity>,
    /// Finish as `failed` when no node completed successfully
    pub fail_when_nothing_succeeds: bool,
}

/// Thresholds for the aggregate health surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// More unhealthy agents than this degrades the report
    pub max_unhealthy_agents: usize,
    /// More errors inside the rolling window than this degrades the report
    pub max_recent_errors: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            min_samples: 5,
            healthy_max_error_rate: 0.05,
            degraded_max_error_rate: 0.30,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            max_retries: 2,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
            breaker_threshold: 5,
            breaker_cooldown_ms: 30_000,
            error_window_secs: 300,
        }
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            escalate_at: Some(Severity::Critical),
            fail_when_nothing_succeeds: false,
        }
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_unhealthy_agents: 0,
            max_recent_errors: 20,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(fallback)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let recovery_defaults = RecoveryConfig::default();
        Self {
            server: ServerConfig {
                host: std::env::var("FLYNT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("FLYNT_PORT", 8000),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("FLYNT_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            },
            llm: LlmConfig {
                base_url: std::env::var("FLYNT_LLM_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                api_key: std::env::var("FLYNT_LLM_API_KEY").unwrap_or_default(),
                model: std::env::var("FLYNT_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                timeout_secs: env_or("FLYNT_LLM_TIMEOUT_SECS", 60),
            },
            engine: EngineConfig {
                recovery: RecoveryConfig {
                    max_retries: env_or("FLYNT_MAX_RETRIES", recovery_defaults.max_retries),
                    breaker_threshold: env_or("FLYNT_BREAKER_THRESHOLD", recovery_defaults.breaker_threshold),
                    breaker_cooldown_ms: env_or("FLYNT_BREAKER_COOLDOWN_MS", recovery_defaults.breaker_cooldown_ms),
                    ..recovery_defaults
                },
                retained_executions: env_or("FLYNT_RETAINED_EXECUTIONS", 0),
                ..EngineConfig::default()
            },
        }
    }
}

impl EngineConfig {
    pub fn event_capacity(&self) -> usize {
        if self.event_capacity == 0 { 256 } else { self.event_capacity }
    }

    pub fn retained_executions(&self) -> usize {
        if self.retained_executions == 0 { 1_000 } else { self.retained_executions }
    }
}

/// Error Recovery Manager
///
/// Classifies node failures into a kind and severity, decides whether a failure
/// is retried, keeps the bounded error history with aggregate statistics, and
/// runs one circuit breaker per agent.
///
/// Breaker lifecycle:
/// - `closed`: dispatches flow; consecutive failures are counted
/// - `open`: dispatches short-circuit until the cool-down elapses
/// - `half_open`: exactly one trial dispatch decides between closed and open

use crate::config::{EscalationPolicy, RecoveryConfig};
use crate::error::EngineError;
use crate::health::history::ErrorHistory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The agent's remote model call failed
    Backend,
    Timeout,
    /// Bad context or configuration; never retried
    Validation,
    UnknownAgent,
    Internal,
    /// Dispatch rejected by a tripped breaker
    CircuitOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: ErrorKind,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, severity: Severity, message: impl Into<String>, agent: Option<&str>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            severity,
            message: message.into(),
            agent: agent.map(str::to_string),
        }
    }
}

/// Map an agent's failure message onto the error taxonomy
pub fn failure_from_message(message: &str) -> EngineError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        EngineError::Timeout(message.to_string())
    } else if lower.starts_with("validation failed") {
        EngineError::ValidationFailure(message.to_string())
    } else {
        EngineError::BackendFailure(message.to_string())
    }
}

pub fn classify(error: &EngineError) -> Classification {
    let (kind, severity) = match error {
        EngineError::BackendFailure(message) => (ErrorKind::Backend, backend_severity(message)),
        EngineError::Timeout(_) => (ErrorKind::Timeout, Severity::Medium),
        EngineError::ValidationFailure(_) => (ErrorKind::Validation, Severity::Medium),
        EngineError::UnknownAgentKind(_) => (ErrorKind::UnknownAgent, Severity::High),
        EngineError::InternalFault(_) => (ErrorKind::Internal, Severity::Critical),
        EngineError::GraphNotFound(_)
        | EngineError::GraphCycle(_)
        | EngineError::InvalidGraph(_)
        | EngineError::ExecutionNotFound(_) => (ErrorKind::Internal, Severity::High),
    };
    Classification { kind, severity }
}

/// Status code from the `HTTP NNN: detail` form the HTTP backend reports
fn http_status(message: &str) -> Option<u16> {
    let rest = message.trim_start().strip_prefix("HTTP ")?;
    let (code, _) = rest.split_once(':').unwrap_or((rest, ""));
    code.trim().parse().ok()
}

fn backend_severity(message: &str) -> Severity {
    if let Some(status) = http_status(message) {
        return match status {
            429 => Severity::Low,
            401 | 403 => Severity::High,
            _ => Severity::Medium,
        };
    }

    let lower = message.to_ascii_lowercase();
    if lower.contains("rate limit") || lower.contains("too many requests") {
        Severity::Low
    } else if lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("api key")
        || lower.contains("api_key")
    {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// Whether a node failure fails the whole execution
pub fn should_escalate(classification: &Classification, policy: &EscalationPolicy) -> bool {
    if classification.kind == ErrorKind::Internal && classification.severity == Severity::Critical {
        return true;
    }
    policy
        .escalate_at
        .map(|threshold| classification.severity >= threshold)
        .unwrap_or(false)
}

/// Outcome of asking a breaker for permission to dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// First dispatch after the cool-down; its outcome closes or re-opens the breaker
    Trial,
    Rejected { retry_after: Duration },
    /// Half-open with the single trial call still outstanding
    TrialInFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum BreakerState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
}

/// One breaker per agent, each behind its own lock
#[derive(Debug)]
pub struct CircuitBreakers {
    threshold: u32,
    cooldown: Duration,
    breakers: RwLock<HashMap<String, Arc<Mutex<Breaker>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CircuitBreakers {
    /// A threshold of zero disables tripping
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    fn breaker(&self, agent: &str) -> Arc<Mutex<Breaker>> {
        if let Some(existing) = self
            .breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(agent)
        {
            return existing.clone();
        }
        self.breakers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(agent.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Breaker {
                    state: BreakerState::Closed,
                    consecutive_failures: 0,
                }))
            })
            .clone()
    }

    pub fn try_acquire(&self, agent: &str) -> Admission {
        let breaker = self.breaker(agent);
        let mut breaker = lock(&breaker);
        match breaker.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::HalfOpen => Admission::TrialInFlight,
            BreakerState::Open { until } => {
                let now = Instant::now();
                if now >= until {
                    breaker.state = BreakerState::HalfOpen;
                    tracing::info!("🔌 Circuit half-open for agent {}, allowing trial call", agent);
                    Admission::Trial
                } else {
                    Admission::Rejected { retry_after: until - now }
                }
            }
        }
    }

    pub fn record_success(&self, agent: &str) {
        let breaker = self.breaker(agent);
        let mut breaker = lock(&breaker);
        if !matches!(breaker.state, BreakerState::Closed) {
            tracing::info!("✅ Circuit closed for agent {}", agent);
        }
        breaker.state = BreakerState::Closed;
        breaker.consecutive_failures = 0;
    }

    pub fn record_failure(&self, agent: &str) {
        let breaker = self.breaker(agent);
        let mut breaker = lock(&breaker);
        breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);

        let trip = match breaker.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => self.threshold > 0 && breaker.consecutive_failures >= self.threshold,
            BreakerState::Open { .. } => false,
        };
        if trip {
            breaker.state = BreakerState::Open { until: Instant::now() + self.cooldown };
            tracing::warn!(
                "🚫 Circuit opened for agent {} after {} consecutive failure(s)",
                agent,
                breaker.consecutive_failures
            );
        }
    }

    pub fn status(&self, agent: &str) -> BreakerStatus {
        let breaker = self.breaker(agent);
        let breaker = lock(&breaker);
        match breaker.state {
            BreakerState::Closed => BreakerStatus::Closed,
            BreakerState::Open { .. } => BreakerStatus::Open,
            BreakerState::HalfOpen => BreakerStatus::HalfOpen,
        }
    }

    pub fn statuses(&self) -> BTreeMap<String, BreakerStatus> {
        let agents: Vec<String> = self
            .breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        agents.into_iter().map(|agent| {
            let status = self.status(&agent);
            (agent, status)
        }).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStatistics {
    /// Every error ever recorded, including ones already evicted from history
    pub total_errors: u64,
    pub by_kind: BTreeMap<ErrorKind, u64>,
    pub by_severity: BTreeMap<Severity, u64>,
    /// Retained errors inside the rolling window
    pub recent_errors: usize,
    pub window_secs: i64,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    by_kind: BTreeMap<ErrorKind, u64>,
    by_severity: BTreeMap<Severity, u64>,
}

#[derive(Debug)]
pub struct ErrorRecoveryManager {
    config: RecoveryConfig,
    history: ErrorHistory,
    counters: Mutex<Counters>,
    breakers: CircuitBreakers,
}

impl ErrorRecoveryManager {
    pub fn new(config: RecoveryConfig) -> Self {
        let history = ErrorHistory::new(config.history_capacity);
        let breakers = CircuitBreakers::new(config.breaker_threshold, Duration::from_millis(config.breaker_cooldown_ms));
        Self {
            config,
            history,
            counters: Mutex::new(Counters::default()),
            breakers,
        }
    }

    /// Append to history and statistics
    pub fn record(&self, classification: Classification, message: impl Into<String>, agent: Option<&str>) -> ErrorRecord {
        let record = ErrorRecord::new(classification.kind, classification.severity, message, agent);
        tracing::warn!(
            agent = agent.unwrap_or("-"),
            kind = ?record.kind,
            severity = ?record.severity,
            "❌ {}",
            record.message
        );

        {
            let mut counters = lock(&self.counters);
            counters.total += 1;
            *counters.by_kind.entry(record.kind).or_default() += 1;
            *counters.by_severity.entry(record.severity).or_default() += 1;
        }
        self.history.push(record.clone());
        record
    }

    /// Classify and record an engine error
    pub fn record_error(&self, error: &EngineError, agent: Option<&str>) -> Classification {
        let classification = classify(error);
        self.record(classification, error.to_string(), agent);
        classification
    }

    /// Retry after `attempt` (zero-based) failed attempts?
    pub fn should_retry(&self, classification: &Classification, attempt: u32) -> bool {
        attempt < self.config.max_retries
            && classification.severity <= Severity::Medium
            && !matches!(classification.kind, ErrorKind::Validation | ErrorKind::CircuitOpen)
    }

    /// Exponential backoff before retry number `attempt + 1`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(self.config.backoff_base_ms.saturating_mul(factor).min(self.config.backoff_max_ms))
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    pub fn statistics(&self) -> ErrorStatistics {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.error_window_secs);
        let counters = lock(&self.counters);
        ErrorStatistics {
            total_errors: counters.total,
            by_kind: counters.by_kind.clone(),
            by_severity: counters.by_severity.clone(),
            recent_errors: self.history.count_since(cutoff),
            window_secs: self.config.error_window_secs,
        }
    }

    pub fn recent_errors(&self, n: usize) -> Vec<ErrorRecord> {
        self.history.recent(n)
    }

    pub fn history(&self) -> &ErrorHistory {
        &self.history
    }
}

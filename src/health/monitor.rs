/// Agent Monitor
///
/// Per-agent rolling health metrics. Cumulative counters are stored raw and
/// derived values (rates, averages) are computed on read. The error rate uses
/// a trailing window of the most recent outcomes.

use crate::agents::types::AgentResult;
use crate::config::MonitorConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

/// Point-in-time metrics for one agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentMetrics {
    pub agent_name: String,
    pub status: HealthStatus,
    pub success_rate: f64,
    pub average_execution_time: f64,
    pub average_quality_score: Option<f64>,
    pub error_rate: f64,
    pub total_executions: u64,
    pub last_execution: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSummary {
    pub total_agents: usize,
    pub by_status: BTreeMap<HealthStatus, usize>,
    pub agents: Vec<AgentMetrics>,
}

impl MonitorSummary {
    pub fn count(&self, status: HealthStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct AgentStats {
    total: u64,
    successes: u64,
    total_time: f64,
    quality_sum: f64,
    quality_count: u64,
    window: VecDeque<bool>,
    last_execution: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct AgentMonitor {
    config: MonitorConfig,
    agents: RwLock<HashMap<String, Arc<Mutex<AgentStats>>>>,
}

fn lock(stats: &Mutex<AgentStats>) -> MutexGuard<'_, AgentStats> {
    stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AgentMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            agents: RwLock::new(HashMap::new()),
        }
    }

    fn stats_for(&self, agent: &str) -> Arc<Mutex<AgentStats>> {
        if let Some(stats) = self
            .agents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(agent)
        {
            return stats.clone();
        }
        self.agents
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(agent.to_string())
            .or_default()
            .clone()
    }

    /// Fold one outcome into the agent's counters
    pub fn record(&self, agent: &str, result: &AgentResult) {
        let stats = self.stats_for(agent);
        let mut stats = lock(&stats);

        stats.total += 1;
        if result.success {
            stats.successes += 1;
        }
        stats.total_time += result.execution_time.max(0.0);
        if let Some(quality) = result.quality_score() {
            stats.quality_sum += quality;
            stats.quality_count += 1;
        }

        stats.window.push_back(result.success);
        while stats.window.len() > self.config.window_size.max(1) {
            stats.window.pop_front();
        }
        stats.last_execution = Some(Utc::now());

        tracing::debug!(
            agent,
            success = result.success,
            total = stats.total,
            "📈 Recorded agent outcome"
        );
    }

    pub fn metrics(&self, agent: &str) -> Option<AgentMetrics> {
        let stats = self
            .agents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(agent)
            .cloned()?;
        let stats = lock(&stats);
        Some(self.derive(agent, &stats))
    }

    fn derive(&self, agent: &str, stats: &AgentStats) -> AgentMetrics {
        let success_rate = if stats.total == 0 {
            0.0
        } else {
            stats.successes as f64 / stats.total as f64
        };
        let average_execution_time = if stats.total == 0 {
            0.0
        } else {
            stats.total_time / stats.total as f64
        };
        let average_quality_score = (stats.quality_count > 0).then(|| stats.quality_sum / stats.quality_count as f64);

        let error_rate = if stats.window.is_empty() {
            0.0
        } else {
            let failures = stats.window.iter().filter(|ok| !**ok).count();
            failures as f64 / stats.window.len() as f64
        };

        AgentMetrics {
            agent_name: agent.to_string(),
            status: self.classify(stats.total, error_rate),
            success_rate,
            average_execution_time,
            average_quality_score,
            error_rate,
            total_executions: stats.total,
            last_execution: stats.last_execution,
        }
    }

    fn classify(&self, total: u64, error_rate: f64) -> HealthStatus {
        if total < self.config.min_samples {
            HealthStatus::Unknown
        } else if error_rate <= self.config.healthy_max_error_rate {
            HealthStatus::Healthy
        } else if error_rate <= self.config.degraded_max_error_rate {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Metrics for every agent seen so far, ordered by name
    pub fn all_metrics(&self) -> Vec<AgentMetrics> {
        let entries: Vec<(String, Arc<Mutex<AgentStats>>)> = self
            .agents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(name, stats)| (name.clone(), stats.clone()))
            .collect();

        let mut metrics: Vec<AgentMetrics> = entries
            .iter()
            .map(|(name, stats)| self.derive(name, &lock(stats)))
            .collect();
        metrics.sort_by(|a, b| a.agent_name.cmp(&b.agent_name));
        metrics
    }

    pub fn summary(&self) -> MonitorSummary {
        let agents = self.all_metrics();
        let mut by_status = BTreeMap::new();
        for metrics in &agents {
            *by_status.entry(metrics.status).or_insert(0) += 1;
        }
        MonitorSummary {
            total_agents: agents.len(),
            by_status,
            agents,
        }
    }
}

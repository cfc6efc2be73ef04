/// Health and recovery
///
/// - `monitor`: per-agent rolling metrics and health classification
/// - `recovery`: error classification, retry policy, circuit breakers
/// - `history`: bounded error history
///
/// `HealthReport` combines them into the read-only aggregate view served over HTTP.

pub mod history;
pub mod monitor;
pub mod recovery;

pub use history::ErrorHistory;
pub use monitor::{AgentMetrics, AgentMonitor, HealthStatus, MonitorSummary};
pub use recovery::{
    Admission, BreakerStatus, CircuitBreakers, Classification, ErrorKind, ErrorRecord, ErrorRecoveryManager,
    ErrorStatistics, Severity,
};

use crate::config::HealthThresholds;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Errors included in the aggregate report
pub const REPORTED_RECENT_ERRORS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub timestamp: DateTime<Utc>,
    pub agents: MonitorSummary,
    pub error_statistics: ErrorStatistics,
    pub recent_errors: Vec<ErrorRecord>,
    pub circuit_breakers: BTreeMap<String, BreakerStatus>,
}

impl HealthReport {
    pub fn build(monitor: &AgentMonitor, recovery: &ErrorRecoveryManager, thresholds: &HealthThresholds) -> Self {
        let agents = monitor.summary();
        let error_statistics = recovery.statistics();

        let unhealthy = agents.count(HealthStatus::Unhealthy);
        let status = if unhealthy > thresholds.max_unhealthy_agents
            || error_statistics.recent_errors > thresholds.max_recent_errors
        {
            OverallStatus::Degraded
        } else {
            OverallStatus::Healthy
        };

        Self {
            status,
            timestamp: Utc::now(),
            agents,
            error_statistics,
            recent_errors: recovery.recent_errors(REPORTED_RECENT_ERRORS),
            circuit_breakers: recovery.breakers().statuses(),
        }
    }
}

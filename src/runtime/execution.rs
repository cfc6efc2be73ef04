/// Execution records and status events
///
/// Every execution owns one `ExecutionRecord` behind its own lock. All writes go
/// through `ExecutionStore`, which enforces the state machine
/// `pending -> running -> {completed, failed}` and rejects any write to a terminal
/// record. `cancelled` is reachable from both live states, so an execution
/// cancelled before its first dispatch never reports `running`. Accepted
/// transitions are published on the event bus. Only the newest terminal records
/// are retained; live records are never evicted.

use crate::agents::types::AgentResult;
use crate::error::{EngineError, EngineResult};
use crate::health::recovery::{Classification, ErrorKind, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Terminal per-node state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
}

impl NodeError {
    pub fn new(classification: Classification, message: impl Into<String>) -> Self {
        Self {
            kind: classification.kind,
            severity: classification.severity,
            message: message.into(),
        }
    }
}

/// Final outcome of one node within an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AgentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    /// Upstream node whose failure caused the skip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_because: Option<String>,
    /// Agent invocations made, retries included
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
}

impl NodeOutcome {
    pub fn completed(agent: Option<String>, result: AgentResult, attempts: u32) -> Self {
        Self {
            status: NodeStatus::Completed,
            agent,
            result: Some(result),
            error: None,
            skipped_because: None,
            attempts,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(agent: Option<String>, result: Option<AgentResult>, error: NodeError, attempts: u32) -> Self {
        Self {
            status: NodeStatus::Failed,
            agent,
            result,
            error: Some(error),
            skipped_because: None,
            attempts,
            finished_at: Utc::now(),
        }
    }

    pub fn skipped(cause: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Skipped,
            agent: None,
            result: None,
            error: None,
            skipped_because: Some(cause.into()),
            attempts: 0,
            finished_at: Utc::now(),
        }
    }

    pub fn output(&self) -> Option<&str> {
        self.result.as_ref().filter(|r| r.success).map(|r| r.output.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub project_id: String,
    pub status: ExecutionStatus,
    /// Only terminal outcomes, keyed by node id
    pub node_results: BTreeMap<String, NodeOutcome>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Incremental status update for streaming consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    StatusChanged {
        execution_id: String,
        status: ExecutionStatus,
    },
    NodeStarted {
        execution_id: String,
        node_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
    NodeFinished {
        execution_id: String,
        node_id: String,
        status: NodeStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Finished {
        execution_id: String,
        status: ExecutionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            ExecutionEvent::StatusChanged { execution_id, .. }
            | ExecutionEvent::NodeStarted { execution_id, .. }
            | ExecutionEvent::NodeFinished { execution_id, .. }
            | ExecutionEvent::Finished { execution_id, .. } => execution_id,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ExecutionEvent::Finished { .. })
    }
}

/// Broadcast bus; every subscriber sees every event
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ExecutionEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

type SharedRecord = Arc<RwLock<ExecutionRecord>>;

/// Registry of execution records with per-record locking
#[derive(Debug)]
pub struct ExecutionStore {
    records: RwLock<HashMap<String, SharedRecord>>,
    /// Terminal execution ids, oldest first
    finished: Mutex<VecDeque<String>>,
    retained: usize,
    events: EventBus,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ExecutionStore {
    /// `retained` bounds how many terminal records stay queryable
    pub fn new(event_capacity: usize, retained: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            finished: Mutex::new(VecDeque::new()),
            retained: retained.max(1),
            events: EventBus::new(event_capacity),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    fn record(&self, execution_id: &str) -> EngineResult<SharedRecord> {
        read(&self.records)
            .get(execution_id)
            .cloned()
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Allocate a new `pending` record
    pub fn create(&self, project_id: &str) -> ExecutionRecord {
        let record = ExecutionRecord {
            execution_id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            status: ExecutionStatus::Pending,
            node_results: BTreeMap::new(),
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        };
        write(&self.records).insert(record.execution_id.clone(), Arc::new(RwLock::new(record.clone())));
        self.events.publish(ExecutionEvent::StatusChanged {
            execution_id: record.execution_id.clone(),
            status: ExecutionStatus::Pending,
        });
        record
    }

    /// Point-in-time copy taken under the record's lock
    pub fn snapshot(&self, execution_id: &str) -> EngineResult<ExecutionRecord> {
        let record = self.record(execution_id)?;
        let snapshot = read(&record).clone();
        Ok(snapshot)
    }

    pub fn status(&self, execution_id: &str) -> EngineResult<ExecutionStatus> {
        let record = self.record(execution_id)?;
        let status = read(&record).status;
        Ok(status)
    }

    /// `pending -> running`; false when the record already moved on
    pub fn mark_running(&self, execution_id: &str) -> bool {
        let Ok(record) = self.record(execution_id) else {
            return false;
        };
        {
            let mut record = write(&record);
            if record.status != ExecutionStatus::Pending {
                return false;
            }
            record.status = ExecutionStatus::Running;
        }
        self.events.publish(ExecutionEvent::StatusChanged {
            execution_id: execution_id.to_string(),
            status: ExecutionStatus::Running,
        });
        true
    }

    /// Announce a dispatch; suppressed once the record is terminal
    pub fn node_started(&self, execution_id: &str, node_id: &str, agent: Option<String>) {
        if self.status(execution_id).map(|s| s.is_terminal()).unwrap_or(true) {
            return;
        }
        self.events.publish(ExecutionEvent::NodeStarted {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            agent,
        });
    }

    /// Merge a terminal node outcome; rejected for terminal records and repeated nodes
    pub fn record_node(&self, execution_id: &str, node_id: &str, outcome: NodeOutcome) -> bool {
        let Ok(record) = self.record(execution_id) else {
            return false;
        };
        let event = ExecutionEvent::NodeFinished {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            status: outcome.status,
            error: outcome.error.as_ref().map(|e| e.message.clone()),
        };
        {
            let mut record = write(&record);
            if record.status.is_terminal() || record.node_results.contains_key(node_id) {
                return false;
            }
            record.node_results.insert(node_id.to_string(), outcome);
        }
        self.events.publish(event);
        true
    }

    /// Move a live record to a terminal status
    pub fn finish(&self, execution_id: &str, status: ExecutionStatus, error: Option<String>) -> bool {
        if !status.is_terminal() {
            return false;
        }
        let Ok(record) = self.record(execution_id) else {
            return false;
        };
        {
            let mut record = write(&record);
            if record.status.is_terminal() {
                return false;
            }
            record.status = status;
            record.ended_at = Some(Utc::now());
            record.error = error.clone();
        }
        self.events.publish(ExecutionEvent::StatusChanged {
            execution_id: execution_id.to_string(),
            status,
        });
        self.events.publish(ExecutionEvent::Finished {
            execution_id: execution_id.to_string(),
            status,
            error,
        });
        self.retire(execution_id);
        true
    }

    /// Queue a terminal record and drop the oldest ones past the retention cap
    fn retire(&self, execution_id: &str) {
        let evicted: Vec<String> = {
            let mut finished = self.finished.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            finished.push_back(execution_id.to_string());
            let excess = finished.len().saturating_sub(self.retained);
            finished.drain(..excess).collect()
        };
        if evicted.is_empty() {
            return;
        }
        let mut records = write(&self.records);
        for id in &evicted {
            records.remove(id);
        }
        tracing::debug!("🧹 Evicted {} finished execution record(s)", evicted.len());
    }

    /// Mark `cancelled` unless already terminal; returns the resulting snapshot
    pub fn cancel(&self, execution_id: &str) -> EngineResult<ExecutionRecord> {
        self.finish(execution_id, ExecutionStatus::Cancelled, Some("cancelled by request".to_string()));
        self.snapshot(execution_id)
    }

    pub fn len(&self) -> usize {
        read(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.records).is_empty()
    }
}

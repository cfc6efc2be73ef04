/// Bounded error history
///
/// Ring buffer of `ErrorRecord`s. Appends take the lock briefly; readers get an
/// owned snapshot and never hold the lock while iterating.

use crate::health::recovery::ErrorRecord;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
pub struct ErrorHistory {
    capacity: usize,
    entries: Mutex<VecDeque<ErrorRecord>>,
}

impl ErrorHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<ErrorRecord>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a record, returning the evicted oldest entry when full
    pub fn push(&self, record: ErrorRecord) -> Option<ErrorRecord> {
        let mut entries = self.entries();
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(record);
        evicted
    }

    /// The `n` most recent records, oldest first
    pub fn recent(&self, n: usize) -> Vec<ErrorRecord> {
        let entries = self.entries();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn count_since(&self, cutoff: DateTime<Utc>) -> usize {
        self.entries().iter().filter(|r| r.timestamp >= cutoff).count()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

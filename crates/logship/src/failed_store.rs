// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded store of batches that exhausted short-term retry.
//!
//! Batches are kept in insertion order. When the store is full, the oldest
//! batch is evicted to make room: old tail-risk data is traded for bounded
//! memory.

use crate::backoff::progressive_delay;
use crate::constants::INITIAL_LONG_TERM_DELAY;
use crate::entry::LogEntry;
use crate::retention::retain_priority;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct FailedBatch {
    /// Unique for the lifetime of the store.
    pub id: u64,
    pub logs: Vec<LogEntry>,
    pub created_at: Instant,
    pub attempts: u32,
    pub next_retry_at: Instant,
}

impl FailedBatch {
    #[must_use]
    pub fn is_expired(&self, now: Instant, max_age: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > max_age
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_retry_at
    }
}

#[derive(Debug)]
pub struct FailedBatchStore {
    batches: VecDeque<FailedBatch>,
    capacity: usize,
    next_id: u64,
}

impl FailedBatchStore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        FailedBatchStore {
            batches: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            next_id: 0,
        }
    }

    /// Applies prioritized retention to `logs` and stores what is left.
    ///
    /// Returns the id of the stored batch, or `None` when nothing survived
    /// retention and nothing was stored.
    pub fn demote(&mut self, logs: Vec<LogEntry>, now: Instant) -> Option<u64> {
        let offered = logs.len();
        let retained = retain_priority(logs);
        if retained.is_empty() {
            debug!("LOGS | Dropped failed batch of {offered} entries with no priority entries");
            return None;
        }

        if self.batches.len() >= self.capacity {
            if let Some(evicted) = self.batches.pop_front() {
                warn!(
                    "LOGS | Failed-batch store full, evicting batch {} with {} entries",
                    evicted.id,
                    evicted.logs.len()
                );
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        debug!(
            "LOGS | Stored failed batch {id}: kept {} of {offered} entries",
            retained.len()
        );
        self.batches.push_back(FailedBatch {
            id,
            logs: retained,
            created_at: now,
            attempts: 0,
            next_retry_at: now + INITIAL_LONG_TERM_DELAY,
        });
        Some(id)
    }

    /// Removes and returns the batch with `id`, if it is still stored.
    pub fn remove(&mut self, id: u64) -> Option<FailedBatch> {
        let index = self.batches.iter().position(|batch| batch.id == id)?;
        self.batches.remove(index)
    }

    /// Counts a failed long-term attempt and schedules the next one.
    ///
    /// Returns the new attempt count, or `None` if the batch was evicted in
    /// the meantime.
    pub fn record_failure(&mut self, id: u64, now: Instant) -> Option<u32> {
        let batch = self.batches.iter_mut().find(|batch| batch.id == id)?;
        batch.attempts += 1;
        batch.next_retry_at = now + progressive_delay(batch.attempts);
        Some(batch.attempts)
    }

    #[must_use]
    pub fn get(&self, id: u64) -> Option<&FailedBatch> {
        self.batches.iter().find(|batch| batch.id == id)
    }

    /// Copies of every stored batch, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<FailedBatch> {
        self.batches.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{LogContext, LogLevel};

    fn entry(level: LogLevel, message: &str) -> LogEntry {
        LogEntry::new(level, message, LogContext::default(), None, "web", "test")
    }

    #[test]
    fn test_demote_schedules_first_retry_an_hour_out() {
        let mut store = FailedBatchStore::new(10);
        let now = Instant::now();
        let id = store
            .demote(vec![entry(LogLevel::Error, "e")], now)
            .unwrap();

        let batch = store.get(id).unwrap();
        assert_eq!(batch.attempts, 0);
        assert_eq!(batch.created_at, now);
        assert_eq!(batch.next_retry_at, now + Duration::from_secs(3600));
        assert!(!batch.is_due(now));
        assert!(batch.is_due(now + Duration::from_secs(3600)));
    }

    #[test]
    fn test_demote_of_low_value_batch_stores_nothing() {
        let mut store = FailedBatchStore::new(10);
        let logs = (0..5).map(|i| entry(LogLevel::Info, &format!("{i}"))).collect();
        assert_eq!(store.demote(logs, Instant::now()), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_priority_entry_kept_from_mixed_batch() {
        let mut store = FailedBatchStore::new(10);
        let mut logs: Vec<_> = (0..40).map(|i| entry(LogLevel::Info, &format!("{i}"))).collect();
        logs.push(entry(LogLevel::Fatal, "crash"));

        let id = store.demote(logs, Instant::now()).unwrap();
        let batch = store.get(id).unwrap();
        assert_eq!(batch.logs.len(), 1);
        assert_eq!(batch.logs[0].message, "crash");
    }

    #[test]
    fn test_capacity_evicts_oldest_by_identity() {
        let mut store = FailedBatchStore::new(3);
        let start = Instant::now();
        let ids: Vec<_> = (0..3u64)
            .map(|i| {
                store
                    .demote(
                        vec![entry(LogLevel::Error, &format!("batch {i}"))],
                        start + Duration::from_secs(i),
                    )
                    .unwrap()
            })
            .collect();
        let oldest = store.get(ids[0]).unwrap().clone();

        let newest = store
            .demote(
                vec![entry(LogLevel::Error, "batch 3")],
                start + Duration::from_secs(3),
            )
            .unwrap();

        assert_eq!(store.len(), 3);
        assert!(store.get(oldest.id).is_none());
        let remaining: Vec<_> = store.snapshot().iter().map(|b| b.id).collect();
        assert_eq!(remaining, vec![ids[1], ids[2], newest]);
        assert!(store
            .snapshot()
            .iter()
            .all(|b| b.created_at > oldest.created_at));
    }

    #[test]
    fn test_record_failure_uses_progressive_delay() {
        let mut store = FailedBatchStore::new(2);
        let now = Instant::now();
        let id = store.demote(vec![entry(LogLevel::Warn, "w")], now).unwrap();

        let later = now + Duration::from_secs(3600);
        assert_eq!(store.record_failure(id, later), Some(1));
        assert_eq!(
            store.get(id).unwrap().next_retry_at,
            later + Duration::from_secs(3600)
        );
        assert_eq!(store.record_failure(id, later), Some(2));
        assert_eq!(
            store.get(id).unwrap().next_retry_at,
            later + Duration::from_secs(2 * 3600)
        );
    }

    #[test]
    fn test_operations_on_evicted_batch_are_ignored() {
        let mut store = FailedBatchStore::new(1);
        let now = Instant::now();
        let first = store.demote(vec![entry(LogLevel::Error, "a")], now).unwrap();
        store.demote(vec![entry(LogLevel::Error, "b")], now).unwrap();

        assert_eq!(store.record_failure(first, now), None);
        assert!(store.remove(first).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_expiry_is_strictly_after_max_age() {
        let mut store = FailedBatchStore::new(1);
        let now = Instant::now();
        let id = store.demote(vec![entry(LogLevel::Error, "a")], now).unwrap();
        let batch = store.get(id).unwrap();
        let max_age = Duration::from_secs(60);

        assert!(!batch.is_expired(now + max_age, max_age));
        assert!(batch.is_expired(now + max_age + Duration::from_millis(1), max_age));
    }
}

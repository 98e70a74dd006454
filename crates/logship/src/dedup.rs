// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Suppression of repeated low-value log events.
//!
//! Entries at `error`/`fatal` always pass. Every other entry is keyed by a
//! stable hash of `(level, message, source, first 200 chars of data JSON)` and
//! dropped if the same key was let through less than `window` ago.
//!
//! The key deliberately looks at a prefix of the data only, so two events that
//! differ solely in trailing metadata are treated as the same event.

use crate::entry::LogEntry;
use fnv::{FnvBuildHasher, FnvHasher};
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Number of characters of the data JSON included in the key.
const DATA_KEY_PREFIX_CHARS: usize = 200;

#[derive(Debug)]
pub struct DeduplicationFilter {
    window: Duration,
    max_cache_size: usize,
    last_seen: HashMap<u64, Instant, FnvBuildHasher>,
    /// Keys in insertion order, used for capacity eviction.
    insertion_order: VecDeque<u64>,
}

impl DeduplicationFilter {
    #[must_use]
    pub fn new(window: Duration, max_cache_size: usize) -> Self {
        DeduplicationFilter {
            window,
            max_cache_size: max_cache_size.max(1),
            last_seen: HashMap::with_hasher(FnvBuildHasher::default()),
            insertion_order: VecDeque::new(),
        }
    }

    /// Splits `entries` into priority and regular, drops regular entries seen
    /// within the window, and returns `priority ++ deduplicated_regular`.
    ///
    /// Relative order is preserved inside each group.
    pub fn filter(&mut self, entries: Vec<LogEntry>, now: Instant) -> Vec<LogEntry> {
        self.sweep(now);

        let total = entries.len();
        let (mut priority, regular): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|entry| entry.level.is_priority());

        for entry in regular {
            if self.admit(dedup_key(&entry), now) {
                priority.push(entry);
            }
        }

        let suppressed = total - priority.len();
        if suppressed > 0 {
            debug!("LOGS | Suppressed {suppressed} duplicate log entries");
        }
        priority
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    fn admit(&mut self, key: u64, now: Instant) -> bool {
        if let Some(seen_at) = self.last_seen.get_mut(&key) {
            if now.saturating_duration_since(*seen_at) < self.window {
                return false;
            }
            *seen_at = now;
            return true;
        }

        if self.last_seen.len() >= self.max_cache_size {
            self.evict_oldest();
        }
        self.last_seen.insert(key, now);
        self.insertion_order.push_back(key);
        true
    }

    fn evict_oldest(&mut self) {
        while let Some(key) = self.insertion_order.pop_front() {
            if self.last_seen.remove(&key).is_some() {
                return;
            }
        }
    }

    /// Forgets every key whose window has elapsed.
    fn sweep(&mut self, now: Instant) {
        let window = self.window;
        self.last_seen
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) < window);
        let last_seen = &self.last_seen;
        self.insertion_order.retain(|key| last_seen.contains_key(key));
    }
}

fn dedup_key(entry: &LogEntry) -> u64 {
    let mut hasher = FnvHasher::default();
    entry.level.hash(&mut hasher);
    entry.message.hash(&mut hasher);
    entry.source.hash(&mut hasher);
    match &entry.data {
        Some(data) => {
            let encoded = data.as_value().to_string();
            let prefix_end = encoded
                .char_indices()
                .nth(DATA_KEY_PREFIX_CHARS)
                .map_or(encoded.len(), |(index, _)| index);
            encoded[..prefix_end].hash(&mut hasher);
        }
        None => 0u8.hash(&mut hasher),
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{LogContext, LogData, LogLevel};
    use serde_json::json;

    const WINDOW: Duration = Duration::from_secs(60);

    fn entry(level: LogLevel, message: &str, data: Option<serde_json::Value>) -> LogEntry {
        LogEntry::new(
            level,
            message,
            LogContext::default(),
            data.map(|value| LogData::bounded(value, 1 << 20)),
            "web",
            "test",
        )
    }

    #[test]
    fn test_duplicates_within_window_are_dropped() {
        let mut filter = DeduplicationFilter::new(WINDOW, 100);
        let now = Instant::now();

        let out = filter.filter(
            vec![
                entry(LogLevel::Warn, "slow render", Some(json!({"ms": 40}))),
                entry(LogLevel::Warn, "slow render", Some(json!({"ms": 40}))),
            ],
            now,
        );
        assert_eq!(out.len(), 1);

        let out = filter.filter(
            vec![entry(LogLevel::Warn, "slow render", Some(json!({"ms": 40})))],
            now + Duration::from_secs(10),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_entry_passes_again_after_window() {
        let mut filter = DeduplicationFilter::new(WINDOW, 100);
        let now = Instant::now();

        assert_eq!(
            filter
                .filter(vec![entry(LogLevel::Info, "tick", None)], now)
                .len(),
            1
        );
        assert_eq!(
            filter
                .filter(vec![entry(LogLevel::Info, "tick", None)], now + WINDOW)
                .len(),
            1
        );
    }

    #[test]
    fn test_priority_entries_are_never_suppressed_and_come_first() {
        let mut filter = DeduplicationFilter::new(WINDOW, 100);
        let now = Instant::now();

        let out = filter.filter(
            vec![
                entry(LogLevel::Info, "a", None),
                entry(LogLevel::Error, "boom", None),
                entry(LogLevel::Info, "b", None),
                entry(LogLevel::Error, "boom", None),
                entry(LogLevel::Fatal, "down", None),
            ],
            now,
        );

        let messages: Vec<_> = out.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["boom", "boom", "down", "a", "b"]);
    }

    #[test]
    fn test_key_ignores_id_and_context_but_not_level() {
        let mut filter = DeduplicationFilter::new(WINDOW, 100);
        let now = Instant::now();
        let mut second = entry(LogLevel::Info, "same", None);
        second.context = LogContext::default().with_feature("other");

        let out = filter.filter(
            vec![
                entry(LogLevel::Info, "same", None),
                second,
                entry(LogLevel::Debug, "same", None),
            ],
            now,
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_key_only_considers_data_prefix() {
        let mut filter = DeduplicationFilter::new(WINDOW, 100);
        let now = Instant::now();
        let shared = "p".repeat(300);

        let out = filter.filter(
            vec![
                entry(LogLevel::Info, "x", Some(json!({ "a": shared, "z": 1 }))),
                entry(LogLevel::Info, "x", Some(json!({ "a": shared, "z": 2 }))),
            ],
            now,
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_cache_is_bounded_with_insertion_order_eviction() {
        let mut filter = DeduplicationFilter::new(WINDOW, 2);
        let now = Instant::now();

        filter.filter(
            vec![
                entry(LogLevel::Info, "first", None),
                entry(LogLevel::Info, "second", None),
                entry(LogLevel::Info, "third", None),
            ],
            now,
        );
        assert_eq!(filter.len(), 2);

        // "first" was evicted, so it is admitted again; "third" is still cached.
        let out = filter.filter(
            vec![
                entry(LogLevel::Info, "first", None),
                entry(LogLevel::Info, "third", None),
            ],
            now + Duration::from_secs(1),
        );
        let messages: Vec<_> = out.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["first"]);
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn test_sweep_forgets_expired_keys() {
        let mut filter = DeduplicationFilter::new(WINDOW, 100);
        let now = Instant::now();
        filter.filter(vec![entry(LogLevel::Info, "old", None)], now);
        assert_eq!(filter.len(), 1);

        filter.filter(Vec::new(), now + WINDOW + Duration::from_secs(1));
        assert!(filter.is_empty());
    }
}

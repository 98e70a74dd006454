// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Packing of flushed entries into transport-sized batches.
//!
//! Entries are taken in order and appended to the current batch until the
//! next one would exceed either the entry-count or the payload-size limit, at
//! which point a new batch is started. Order is never changed, so causally
//! related entries stay adjacent.
//!
//! The size of a batch is the exact length of the JSON array that will be
//! POSTed: the encoded entries, one comma between each pair, and the brackets.
//! An entry that on its own exceeds the payload limit is placed alone in a
//! batch rather than dropped.

use crate::constants::JSON_ARRAY_OVERHEAD_BYTES;
use crate::entry::LogEntry;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    max_batch_size: usize,
    max_payload_size_bytes: usize,
}

impl Batcher {
    #[must_use]
    pub fn new(max_batch_size: usize, max_payload_size_bytes: usize) -> Self {
        Batcher {
            max_batch_size: max_batch_size.max(1),
            max_payload_size_bytes,
        }
    }

    /// Fails only if an entry cannot be encoded as JSON.
    pub fn batch(&self, entries: Vec<LogEntry>) -> Result<Vec<Vec<LogEntry>>, serde_json::Error> {
        let mut batches = Vec::new();
        let mut current: Vec<LogEntry> = Vec::new();
        let mut current_size = JSON_ARRAY_OVERHEAD_BYTES;

        for entry in entries {
            let entry_size = serde_json::to_vec(&entry)?.len();
            let separator = usize::from(!current.is_empty());

            let over_count = current.len() >= self.max_batch_size;
            let over_size = current_size + separator + entry_size > self.max_payload_size_bytes;
            if !current.is_empty() && (over_count || over_size) {
                batches.push(std::mem::take(&mut current));
                current_size = JSON_ARRAY_OVERHEAD_BYTES;
            }

            if entry_size + JSON_ARRAY_OVERHEAD_BYTES > self.max_payload_size_bytes {
                warn!(
                    "LOGS | Log entry of {} bytes exceeds the {} byte payload limit, sending it alone",
                    entry_size, self.max_payload_size_bytes
                );
            }

            current_size += usize::from(!current.is_empty()) + entry_size;
            current.push(entry);
        }

        if !current.is_empty() {
            batches.push(current);
        }
        Ok(batches)
    }
}

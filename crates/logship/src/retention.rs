// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Prioritized retention applied when a batch is demoted.
//!
//! Only `fatal`, `error` and `warn` entries survive, grouped in that order
//! and capped at [`MAX_RETAINED_PER_FAILED_BATCH`]. Within a level the
//! original order is kept.

use crate::constants::MAX_RETAINED_PER_FAILED_BATCH;
use crate::entry::{LogEntry, LogLevel};

const RETAINED_LEVELS: [LogLevel; 3] = [LogLevel::Fatal, LogLevel::Error, LogLevel::Warn];

#[must_use]
pub fn retain_priority(entries: Vec<LogEntry>) -> Vec<LogEntry> {
    let mut groups: [Vec<LogEntry>; 3] = Default::default();
    for entry in entries {
        if let Some(slot) = RETAINED_LEVELS.iter().position(|level| *level == entry.level) {
            groups[slot].push(entry);
        }
    }

    groups
        .into_iter()
        .flatten()
        .take(MAX_RETAINED_PER_FAILED_BATCH)
        .collect()
}

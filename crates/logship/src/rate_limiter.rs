// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Minimum spacing between outbound send cycles.
//!
//! A cycle that arrives too soon after the previous one is not queued or
//! deferred: the caller drops it and relies on the next natural flush trigger.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_send_at: Mutex<Option<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        RateLimiter {
            min_interval,
            last_send_at: Mutex::new(None),
        }
    }

    /// Returns `true` and records `now` as the last send time if a cycle may
    /// start; returns `false` without side effects otherwise.
    pub fn try_acquire(&self, now: Instant) -> bool {
        let mut last_send_at = self
            .last_send_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = *last_send_at {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        *last_send_at = Some(now);
        true
    }

    /// Time until the next cycle would be admitted.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        let last_send_at = self
            .last_send_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        last_send_at.map_or(Duration::ZERO, |last| {
            self.min_interval
                .saturating_sub(now.saturating_duration_since(last))
        })
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delay schedules for short-term and long-term retries.

use crate::constants::{INITIAL_LONG_TERM_DELAY, MAX_LONG_TERM_DELAY};
use std::time::Duration;

/// Exponential backoff with additive jitter for the short-term retry loop.
///
/// The delay before retry `n` (zero based) is
/// `base_delay * backoff_multiplier^n + jitter`, with jitter drawn uniformly
/// from `[0, max_jitter]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    /// Total number of delivery attempts, the first one included.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry `attempt` without jitter.
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent);
        let millis = self.base_delay.as_millis() as f64 * factor;
        if millis.is_finite() && millis < u64::MAX as f64 {
            // saturating float to int conversion
            Duration::from_millis(millis as u64)
        } else {
            Duration::from_millis(u64::MAX)
        }
    }

    /// Largest delay the schedule can produce:
    /// `base_delay * backoff_multiplier^max_retries + max_jitter`.
    #[must_use]
    pub fn delay_ceiling(&self) -> Duration {
        self.base_delay_for(self.max_retries)
            .saturating_add(self.max_jitter)
    }

    /// Starts a schedule for one batch.
    #[must_use]
    pub fn schedule(&self, rng: fastrand::Rng) -> Backoff {
        Backoff {
            policy: *self,
            attempt: 0,
            previous: Duration::ZERO,
            rng,
        }
    }
}

/// Successive retry delays for one batch.
///
/// Jitter could make a later delay shorter than an earlier one when the
/// exponential step is smaller than the jitter range; delays are clamped so
/// the sequence never decreases.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
    previous: Duration,
    rng: fastrand::Rng,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        let jitter_ms = u64::try_from(self.policy.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(self.rng.u64(0..=jitter_ms));
        let delay = self
            .policy
            .base_delay_for(self.attempt)
            .saturating_add(jitter)
            .max(self.previous);
        self.previous = delay;
        self.attempt += 1;
        Some(delay)
    }
}

/// Delay before the next long-term retry after `attempts` failed ones:
/// 1h, 2h, 4h, 8h, then capped at 12h.
#[must_use]
pub fn progressive_delay(attempts: u32) -> Duration {
    let doublings = attempts.saturating_sub(1).min(16);
    INITIAL_LONG_TERM_DELAY
        .saturating_mul(1u32 << doublings)
        .min(MAX_LONG_TERM_DELAY)
}

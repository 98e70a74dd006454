// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The destination shared by a root logger and all of its children.
//!
//! A flushed buffer goes through deduplication, batching and the rate
//! limiter, then each batch is sent in turn. Batches that exhaust short-term
//! retry are demoted to the failed-batch store, which the background
//! reconciler drains.

use crate::backoff::RetryPolicy;
use crate::batcher::Batcher;
use crate::clock::Clock;
use crate::config::LoggerConfig;
use crate::dedup::DeduplicationFilter;
use crate::entry::LogEntry;
use crate::error::PipelineError;
use crate::failed_store::{FailedBatch, FailedBatchStore};
use crate::rate_limiter::RateLimiter;
use crate::reconciler::{BackgroundReconciler, ReconcilerSettings};
use crate::sender::{SendOutcome, ShortTermSender};
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// What happened to one flushed buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Entries handed to the pipeline.
    pub received: usize,
    /// Entries suppressed as duplicates.
    pub deduplicated: usize,
    pub batches: usize,
    /// Batches accepted by the collector.
    pub delivered: usize,
    /// Batches moved to the failed-batch store.
    pub demoted: usize,
    /// Entries discarded because the cycle was rate limited.
    pub dropped_by_rate_limit: usize,
    /// Entries of failed batches not kept by prioritized retention.
    pub dropped_by_retention: usize,
}

pub struct Pipeline {
    dedup: Mutex<DeduplicationFilter>,
    batcher: Batcher,
    rate_limiter: RateLimiter,
    sender: ShortTermSender,
    failed: Arc<Mutex<FailedBatchStore>>,
    clock: Arc<dyn Clock>,
    inter_batch_delay: Duration,
    reconciler_settings: ReconcilerSettings,
    closed: AtomicBool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("batcher", &self.batcher)
            .field("sender", &self.sender)
            .field("inter_batch_delay", &self.inter_batch_delay)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(config: &LoggerConfig, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        let policy = RetryPolicy {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            backoff_multiplier: config.backoff_multiplier,
            max_jitter: config.max_jitter,
        };
        Pipeline {
            dedup: Mutex::new(DeduplicationFilter::new(
                config.deduplication_window,
                config.max_cache_size,
            )),
            batcher: Batcher::new(config.max_batch_size, config.max_payload_size_bytes),
            rate_limiter: RateLimiter::new(config.min_send_interval),
            sender: ShortTermSender::new(transport, policy, config.send_timeout),
            failed: Arc::new(Mutex::new(FailedBatchStore::new(config.max_failed_batches))),
            clock,
            inter_batch_delay: config.inter_batch_delay,
            reconciler_settings: ReconcilerSettings {
                interval: config.background_retry_interval,
                max_age: config.max_failed_batch_age,
                max_long_term_retries: config.max_long_term_retries,
            },
            closed: AtomicBool::new(false),
        }
    }

    /// A reconciler over this pipeline's failed-batch store and transport.
    #[must_use]
    pub fn reconciler(&self) -> BackgroundReconciler {
        BackgroundReconciler::new(
            Arc::clone(&self.failed),
            self.sender.clone(),
            Arc::clone(&self.clock),
            self.reconciler_settings,
        )
    }

    fn failed(&self) -> MutexGuard<'_, FailedBatchStore> {
        self.failed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn failed_batches(&self) -> Vec<FailedBatch> {
        self.failed().snapshot()
    }

    /// Time until the rate limiter admits another send cycle.
    #[must_use]
    pub fn rate_limit_remaining(&self) -> Duration {
        self.rate_limiter.remaining(self.clock.now())
    }

    /// Refuses every later delivery.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Runs one send cycle for `entries`.
    ///
    /// Send failures never surface here: they end up as demoted batches in
    /// the report. An error means the entries could not be processed at all.
    pub async fn deliver(&self, entries: Vec<LogEntry>) -> Result<DeliveryReport, PipelineError> {
        if self.is_closed() {
            return Err(PipelineError::Closed);
        }

        let mut report = DeliveryReport {
            received: entries.len(),
            ..Default::default()
        };
        if entries.is_empty() {
            return Ok(report);
        }

        let filtered = {
            let now = self.clock.now();
            let mut dedup = self.dedup.lock().unwrap_or_else(PoisonError::into_inner);
            dedup.filter(entries, now)
        };
        report.deduplicated = report.received - filtered.len();

        let batches = self.batcher.batch(filtered)?;
        report.batches = batches.len();
        if batches.is_empty() {
            return Ok(report);
        }

        if !self.rate_limiter.try_acquire(self.clock.now()) {
            report.dropped_by_rate_limit = batches.iter().map(Vec::len).sum();
            warn!(
                "LOGS | Send cycle rate limited, dropping {} entries in {} batches",
                report.dropped_by_rate_limit, report.batches
            );
            return Ok(report);
        }

        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 && !self.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.inter_batch_delay).await;
            }
            match self.sender.send(&batch).await {
                SendOutcome::Delivered { .. } => report.delivered += 1,
                SendOutcome::Exhausted { .. } => {
                    let offered = batch.len();
                    let retained = self.demote(batch);
                    if retained > 0 {
                        report.demoted += 1;
                    }
                    report.dropped_by_retention += offered - retained;
                }
            }
        }

        debug!("LOGS | Send cycle finished: {report:?}");
        Ok(report)
    }

    /// Returns the number of entries kept.
    fn demote(&self, batch: Vec<LogEntry>) -> usize {
        let now = self.clock.now();
        let mut store = self.failed();
        let retained = store
            .demote(batch, now)
            .and_then(|id| store.get(id))
            .map_or(0, |stored| stored.logs.len());
        retained
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Long-term retry of demoted batches.
//!
//! On every tick each stored batch is, in order: expired if older than the
//! maximum age, given up if it used all of its long-term attempts, or sent
//! once if its retry time has come. A failed send reschedules the batch with
//! a doubling delay.
//!
//! The store lock is never held while sending: due batches are copied out,
//! sent, and their outcome applied by id afterwards. A batch evicted by a
//! concurrent demotion while in flight is simply forgotten.
//!
//! Passes are serialized, so the interval loop and an explicit
//! [`BackgroundReconciler::tick`] never send the same due batch twice.

use crate::clock::Clock;
use crate::failed_store::{FailedBatch, FailedBatchStore};
use crate::sender::ShortTermSender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub delivered: usize,
    pub expired: usize,
    pub given_up: usize,
    pub rescheduled: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerSettings {
    pub interval: Duration,
    pub max_age: Duration,
    pub max_long_term_retries: u32,
}

#[derive(Debug)]
pub struct BackgroundReconciler {
    store: Arc<Mutex<FailedBatchStore>>,
    sender: ShortTermSender,
    clock: Arc<dyn Clock>,
    settings: ReconcilerSettings,
    pass: AsyncMutex<()>,
}

impl BackgroundReconciler {
    #[must_use]
    pub fn new(
        store: Arc<Mutex<FailedBatchStore>>,
        sender: ShortTermSender,
        clock: Arc<dyn Clock>,
        settings: ReconcilerSettings,
    ) -> Self {
        BackgroundReconciler {
            store,
            sender,
            clock,
            settings,
            pass: AsyncMutex::new(()),
        }
    }

    fn store(&self) -> MutexGuard<'_, FailedBatchStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one reconciliation pass over the store, waiting for any pass
    /// already in progress to finish first.
    pub async fn tick(&self) -> ReconcileReport {
        let _pass = self.pass.lock().await;
        let mut report = ReconcileReport::default();
        let due = self.sweep(&mut report);

        for batch in due {
            match self.sender.send_once(&batch.logs).await {
                Ok(()) => {
                    if self.store().remove(batch.id).is_some() {
                        debug!(
                            "LOGS | Delivered failed batch {} with {} entries",
                            batch.id,
                            batch.logs.len()
                        );
                    }
                    report.delivered += 1;
                }
                Err(e) => {
                    let now = self.clock.now();
                    let attempts = self.store().record_failure(batch.id, now);
                    if let Some(attempts) = attempts {
                        debug!(
                            "LOGS | Long-term retry {attempts} of failed batch {} failed: {e}",
                            batch.id
                        );
                        report.rescheduled += 1;
                    }
                }
            }
        }

        if report != ReconcileReport::default() {
            debug!("LOGS | Reconciliation finished: {report:?}");
        }
        report
    }

    /// Drops expired and exhausted batches and returns copies of the due ones.
    fn sweep(&self, report: &mut ReconcileReport) -> Vec<FailedBatch> {
        let now = self.clock.now();
        let mut store = self.store();
        let mut due = Vec::new();

        for batch in store.snapshot() {
            if batch.is_expired(now, self.settings.max_age) {
                store.remove(batch.id);
                warn!(
                    "LOGS | Dropping failed batch {} with {} entries: older than {:?}",
                    batch.id,
                    batch.logs.len(),
                    self.settings.max_age
                );
                report.expired += 1;
            } else if batch.attempts >= self.settings.max_long_term_retries {
                store.remove(batch.id);
                warn!(
                    "LOGS | Giving up on failed batch {} with {} entries after {} attempts",
                    batch.id,
                    batch.logs.len(),
                    batch.attempts
                );
                report.given_up += 1;
            } else if batch.is_due(now) {
                due.push(batch);
            }
        }
        due
    }

    /// Ticks every configured interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.settings.interval);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("LOGS | Background reconciler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::RetryPolicy;
    use crate::clock::ManualClock;
    use crate::entry::{LogContext, LogEntry, LogLevel};
    use crate::error::SendError;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tracing_test::traced_test;

    const HOUR: Duration = Duration::from_secs(3600);

    #[derive(Debug, Default)]
    struct SwitchTransport {
        healthy: AtomicBool,
        calls: AtomicUsize,
        latency: Duration,
    }

    #[async_trait]
    impl Transport for SwitchTransport {
        async fn send(&self, _batch: &[LogEntry]) -> Result<(), SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(SendError::Status(502))
            }
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        transport: Arc<SwitchTransport>,
        store: Arc<Mutex<FailedBatchStore>>,
        reconciler: BackgroundReconciler,
    }

    fn fixture(max_long_term_retries: u32) -> Fixture {
        fixture_with(max_long_term_retries, SwitchTransport::default())
    }

    fn fixture_with(max_long_term_retries: u32, transport: SwitchTransport) -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let transport = Arc::new(transport);
        let store = Arc::new(Mutex::new(FailedBatchStore::new(10)));
        let sender = ShortTermSender::new(
            transport.clone(),
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_secs(1),
                backoff_multiplier: 2.0,
                max_jitter: Duration::ZERO,
            },
            Duration::from_secs(10),
        );
        let reconciler = BackgroundReconciler::new(
            store.clone(),
            sender,
            clock.clone(),
            ReconcilerSettings {
                interval: Duration::from_secs(30 * 60),
                max_age: 24 * HOUR,
                max_long_term_retries,
            },
        );
        Fixture {
            clock,
            transport,
            store,
            reconciler,
        }
    }

    fn demote(fixture: &Fixture, message: &str) -> u64 {
        let entry = LogEntry::new(
            LogLevel::Error,
            message,
            LogContext::default(),
            None,
            "web",
            "test",
        );
        fixture
            .store
            .lock()
            .unwrap()
            .demote(vec![entry], fixture.clock.now())
            .unwrap()
    }

    #[tokio::test]
    async fn test_nothing_is_sent_before_retry_time() {
        let fixture = fixture(5);
        demote(&fixture, "a");
        fixture.clock.advance(HOUR - Duration::from_secs(1));

        let report = fixture.reconciler.tick().await;
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(fixture.transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_due_batch_is_delivered_and_removed() {
        let fixture = fixture(5);
        fixture.transport.healthy.store(true, Ordering::SeqCst);
        demote(&fixture, "a");
        fixture.clock.advance(HOUR);

        let report = fixture.reconciler.tick().await;
        assert_eq!(report.delivered, 1);
        assert_eq!(fixture.transport.calls.load(Ordering::SeqCst), 1);
        assert!(fixture.store.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_retry_is_rescheduled_progressively() {
        let fixture = fixture(5);
        let id = demote(&fixture, "a");
        fixture.clock.advance(HOUR);

        let report = fixture.reconciler.tick().await;
        assert_eq!(report.rescheduled, 1);
        // single direct send, no short-term retry loop
        assert_eq!(fixture.transport.calls.load(Ordering::SeqCst), 1);
        {
            let store = fixture.store.lock().unwrap();
            let batch = store.get(id).unwrap();
            assert_eq!(batch.attempts, 1);
            assert_eq!(batch.next_retry_at, fixture.clock.now() + HOUR);
        }

        fixture.clock.advance(HOUR);
        fixture.reconciler.tick().await;
        let store = fixture.store.lock().unwrap();
        let batch = store.get(id).unwrap();
        assert_eq!(batch.attempts, 2);
        assert_eq!(batch.next_retry_at, fixture.clock.now() + 2 * HOUR);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_expired_batch_is_removed_without_send() {
        let fixture = fixture(5);
        demote(&fixture, "old");
        fixture.clock.advance(24 * HOUR + Duration::from_secs(1));

        let report = fixture.reconciler.tick().await;
        assert_eq!(report.expired, 1);
        assert_eq!(fixture.transport.calls.load(Ordering::SeqCst), 0);
        assert!(fixture.store.lock().unwrap().is_empty());
        assert!(logs_contain("older than"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_exhausted_batch_is_given_up() {
        let fixture = fixture(1);
        let id = demote(&fixture, "a");
        fixture.clock.advance(HOUR);
        fixture.reconciler.tick().await;
        assert_eq!(fixture.store.lock().unwrap().get(id).unwrap().attempts, 1);

        let report = fixture.reconciler.tick().await;
        assert_eq!(report.given_up, 1);
        assert_eq!(fixture.transport.calls.load(Ordering::SeqCst), 1);
        assert!(fixture.store.lock().unwrap().is_empty());
        assert!(logs_contain("Giving up on failed batch"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_passes_send_due_batch_once() {
        let fixture = fixture_with(
            5,
            SwitchTransport {
                latency: Duration::from_secs(1),
                ..Default::default()
            },
        );
        let id = demote(&fixture, "a");
        fixture.clock.advance(HOUR);

        let (first, second) = tokio::join!(fixture.reconciler.tick(), fixture.reconciler.tick());

        assert_eq!(fixture.transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.rescheduled + second.rescheduled, 1);
        let store = fixture.store.lock().unwrap();
        assert_eq!(store.get(id).unwrap().attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_on_interval_until_cancelled() {
        let fixture = fixture(5);
        fixture.transport.healthy.store(true, Ordering::SeqCst);
        demote(&fixture, "a");
        fixture.clock.advance(HOUR);

        let reconciler = Arc::new(fixture.reconciler);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let reconciler = reconciler.clone();
            let cancel = cancel.clone();
            async move { reconciler.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fixture.transport.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert_eq!(fixture.transport.calls.load(Ordering::SeqCst), 1);
        assert!(fixture.store.lock().unwrap().is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}

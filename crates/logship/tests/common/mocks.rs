// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock transports for exercising the pipeline without a collector

use logship::{LogEntry, SendError, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Records every attempt; succeeds unless switched to failing.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    failing: AtomicBool,
    attempts: Mutex<Vec<(Instant, Vec<LogEntry>)>>,
}

#[allow(dead_code)]
impl RecordingTransport {
    pub fn failing() -> Self {
        let transport = Self::default();
        transport.set_failing(true);
        transport
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    /// Batches of every attempt, successful or not.
    pub fn batches(&self) -> Vec<Vec<LogEntry>> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, batch)| batch.clone())
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.batches()
            .into_iter()
            .flatten()
            .map(|entry| entry.message)
            .collect()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, batch: &[LogEntry]) -> Result<(), SendError> {
        self.attempts
            .lock()
            .unwrap()
            .push((Instant::now(), batch.to_vec()));
        if self.failing.load(Ordering::SeqCst) {
            Err(SendError::Status(503))
        } else {
            Ok(())
        }
    }
}

/// Holds every send until released.
#[derive(Debug, Default)]
pub struct GatedTransport {
    pub entered: Notify,
    pub release: Notify,
    pub sent: Mutex<Vec<Vec<LogEntry>>>,
}

#[async_trait::async_trait]
impl Transport for GatedTransport {
    async fn send(&self, batch: &[LogEntry]) -> Result<(), SendError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.sent.lock().unwrap().push(batch.to_vec());
        Ok(())
    }
}

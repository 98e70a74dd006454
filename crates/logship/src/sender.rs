// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::backoff::RetryPolicy;
use crate::entry::LogEntry;
use crate::error::SendError;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of the short-term retry loop for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { attempts: u32 },
    /// Every attempt failed; the batch should be demoted.
    Exhausted { attempts: u32 },
}

/// Delivers a batch with bounded exponential backoff.
#[derive(Clone)]
pub struct ShortTermSender {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    send_timeout: Duration,
}

impl std::fmt::Debug for ShortTermSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShortTermSender")
            .field("policy", &self.policy)
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

impl ShortTermSender {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, send_timeout: Duration) -> Self {
        ShortTermSender {
            transport,
            policy,
            send_timeout,
        }
    }

    /// Tries `batch` up to `max_retries + 1` times, sleeping the backoff delay
    /// between attempts. Never returns an error: a batch that cannot be sent
    /// comes back as [`SendOutcome::Exhausted`].
    pub async fn send(&self, batch: &[LogEntry]) -> SendOutcome {
        let mut delays = self.policy.schedule(fastrand::Rng::new());
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.send_once(batch).await {
                Ok(()) => {
                    if attempts > 1 {
                        debug!("LOGS | Batch of {} delivered after {attempts} attempts", batch.len());
                    }
                    return SendOutcome::Delivered { attempts };
                }
                Err(e) => match delays.next() {
                    Some(delay) => {
                        debug!(
                            "LOGS | Attempt {attempts}/{} failed: {e}, retrying in {} ms",
                            self.policy.max_attempts(),
                            delay.as_millis()
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(
                            "LOGS | Failed to send batch of {} entries after {attempts} attempts: {e}",
                            batch.len()
                        );
                        return SendOutcome::Exhausted { attempts };
                    }
                },
            }
        }
    }

    /// A single attempt bounded by the send timeout.
    pub async fn send_once(&self, batch: &[LogEntry]) -> Result<(), SendError> {
        match tokio::time::timeout(self.send_timeout, self.transport.send(batch)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout(self.send_timeout.as_millis())),
        }
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use logship::{Logger, LoggerConfig, LoggerParts, SystemClock, Transport, TracingSink};
use std::sync::Arc;
use std::time::Duration;

/// Defaults with deterministic backoff and no pause between batches.
pub fn test_config() -> LoggerConfig {
    LoggerConfig {
        max_jitter: Duration::ZERO,
        inter_batch_delay: Duration::ZERO,
        ..Default::default()
    }
}

pub fn build_logger(config: LoggerConfig, transport: Arc<dyn Transport>) -> Logger {
    Logger::from_parts(LoggerParts {
        config,
        transport,
        clock: Arc::new(SystemClock),
        console: Arc::new(TracingSink),
    })
    .expect("valid test config")
}

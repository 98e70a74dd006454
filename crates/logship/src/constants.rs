// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed limits of the delivery pipeline.
//!
//! Everything tunable per deployment lives in [`crate::config::LoggerConfig`];
//! the values here define the retention policy itself and are not configurable.

use std::time::Duration;

/// Maximum number of entries kept from a batch when it is demoted to the
/// failed-batch store.
pub const MAX_RETAINED_PER_FAILED_BATCH: usize = 50;

/// Maximum number of `error`/`fatal` entries put back into the buffer after a
/// failed flush. The most recent ones are kept.
pub const MAX_REQUEUED_PRIORITY_ENTRIES: usize = 50;

/// Delay before the first long-term retry of a demoted batch.
pub const INITIAL_LONG_TERM_DELAY: Duration = Duration::from_secs(60 * 60);

/// Ceiling of the doubling long-term retry delay.
pub const MAX_LONG_TERM_DELAY: Duration = Duration::from_secs(12 * 60 * 60);

/// Bytes added by the JSON array around a batch: `[` and `]`.
pub(crate) const JSON_ARRAY_OVERHEAD_BYTES: usize = 2;

/// `User-Agent` sent with every delivery.
pub const USER_AGENT: &str = concat!("logship/", env!("CARGO_PKG_VERSION"));

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # logship
//!
//! Client-side log shipping that survives flaky networks without ever
//! getting in the way of the application that logs.
//!
//! ## Overview
//!
//! An application logs through a [`Logger`]. Calls are synchronous, never
//! fail and never touch the network: entries are appended to a small
//! in-memory buffer that is flushed in the background. A flushed buffer
//! travels through one shared pipeline:
//!
//! - [`dedup`]: repeated low-value events inside a time window are dropped
//! - [`batcher`]: entries are packed into batches bounded by count and size
//! - [`rate_limiter`]: send cycles closer than a minimum interval are dropped
//! - [`sender`]: each batch is sent with bounded exponential backoff
//! - [`failed_store`]: batches that still fail keep only their high-severity
//!   entries and wait for the [`reconciler`], which retries them hours apart
//!
//! ## Usage
//!
//! ```rust,ignore
//! use logship::{HttpTransport, LogContext, Logger, LoggerConfig};
//! use std::sync::Arc;
//!
//! let config = LoggerConfig::from_env()?;
//! let transport = Arc::new(HttpTransport::new(&config));
//! let logger = Logger::new(config, transport)?;
//!
//! let checkout = logger.child(LogContext::default().with_feature("checkout"));
//! checkout.info_with("cart loaded", &serde_json::json!({"items": 3}));
//! checkout.error_from("payment failed", &err);
//!
//! logger.shutdown().await;
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod backoff;
pub mod batcher;
pub mod clock;
pub mod config;
pub mod console;
pub mod constants;
pub mod dedup;
pub mod entry;
pub mod error;
pub mod failed_store;
pub mod http;
pub mod logger;
pub mod pipeline;
pub mod rate_limiter;
pub mod reconciler;
pub mod retention;
pub mod sender;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LoggerConfig, RuntimeMode};
pub use console::{ConsoleSink, TracingSink};
pub use entry::{ErrorInfo, LogContext, LogData, LogEntry, LogLevel};
pub use error::{ConfigError, PipelineError, SendError};
pub use logger::{FlushOutcome, Logger, LoggerParts, ShutdownStatus};
pub use pipeline::DeliveryReport;
pub use reconciler::ReconcileReport;
pub use transport::{HttpTransport, Transport};

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The application-facing logger.
//!
//! Logging calls only build an entry and append it to the logger's buffer;
//! they never perform I/O and never fail. Flushes run as tasks on the tokio
//! runtime the logger was created on:
//!
//! * when the buffer reaches `max_buffer_size`,
//! * when an `error`/`fatal` entry is buffered and the buffer reaches
//!   `critical_pressure_threshold`,
//! * every `periodic_flush_interval` in production mode,
//! * on [`Logger::notify_visibility_lost`], [`Logger::flush`] and
//!   [`Logger::shutdown`].
//!
//! At most one flush runs per logger at a time; a trigger that arrives while
//! one is scheduled or running is a no-op. A flush swaps the whole buffer for
//! an empty one, so entries appended while it runs are kept for the next one.
//!
//! [`Logger::child`] creates a logger with its own buffer, timer and context
//! that delivers through the same pipeline as its parent.

use crate::clock::{Clock, SystemClock};
use crate::config::{LoggerConfig, RuntimeMode};
use crate::console::{ConsoleSink, TracingSink};
use crate::constants::MAX_REQUEUED_PRIORITY_ENTRIES;
use crate::entry::{ErrorInfo, LogContext, LogData, LogEntry, LogLevel};
use crate::error::ConfigError;
use crate::failed_store::FailedBatch;
use crate::pipeline::{DeliveryReport, Pipeline};
use crate::reconciler::{BackgroundReconciler, ReconcileReport};
use crate::transport::Transport;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// Result of one flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush of this logger was already scheduled or running.
    AlreadyInFlight,
    Empty,
    Completed(DeliveryReport),
    /// The pipeline rejected the entries; priority entries were put back.
    Failed { requeued: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    Clean,
    /// The grace period ran out before the final flush and background work
    /// finished.
    TimedOut,
}

/// Everything needed to build a root [`Logger`].
pub struct LoggerParts {
    pub config: LoggerConfig,
    pub transport: Arc<dyn Transport>,
    pub clock: Arc<dyn Clock>,
    pub console: Arc<dyn ConsoleSink>,
}

/// State shared by a root logger and all of its children.
struct Shared {
    config: LoggerConfig,
    pipeline: Arc<Pipeline>,
    reconciler: Arc<BackgroundReconciler>,
    console: Arc<dyn ConsoleSink>,
    runtime: Handle,
    tracker: TaskTracker,
    cancel: CancellationToken,
    next_logger_id: AtomicU64,
    instances: Mutex<Vec<Weak<LoggerState>>>,
}

impl Shared {
    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let _ = self.tracker.spawn_on(task, &self.runtime);
    }

    fn live_instances(&self) -> Vec<Arc<LoggerState>> {
        let instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        instances.iter().filter_map(Weak::upgrade).collect()
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct LoggerState {
    id: u64,
    root: bool,
    context: LogContext,
    buffer: Mutex<VecDeque<LogEntry>>,
    flush_pending: AtomicBool,
    flush_done: Notify,
    cancel: CancellationToken,
    shared: Arc<Shared>,
}

impl LoggerState {
    fn buffer(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `entry` and returns whether a flush should be triggered.
    fn append(&self, entry: LogEntry) -> bool {
        let config = &self.shared.config;
        let mut buffer = self.buffer();

        // full while a flush is pending
        while buffer.len() >= config.max_buffer_size {
            self.evict_one(&mut buffer);
        }
        buffer.push_back(entry);

        let len = buffer.len();
        len >= config.max_buffer_size
            || (len >= config.critical_pressure_threshold
                && buffer.iter().any(|buffered| buffered.level.is_priority()))
    }

    /// Puts `priority` back in front of the buffer, then trims the buffer to
    /// `max_buffer_size`.
    fn requeue(&self, priority: Vec<LogEntry>) {
        let mut buffer = self.buffer();
        for entry in priority.into_iter().rev() {
            buffer.push_front(entry);
        }
        while buffer.len() > self.shared.config.max_buffer_size {
            self.evict_one(&mut buffer);
        }
    }

    /// Drops the oldest regular entry, or the oldest entry if all are
    /// priority.
    fn evict_one(&self, buffer: &mut VecDeque<LogEntry>) {
        let index = buffer
            .iter()
            .position(|buffered| !buffered.level.is_priority())
            .unwrap_or(0);
        if let Some(dropped) = buffer.remove(index) {
            debug!(
                "LOGS | Buffer of logger {} full, dropping {} entry",
                self.id, dropped.level
            );
        }
    }
}

impl Drop for LoggerState {
    fn drop(&mut self) {
        self.cancel.cancel();
        let entries: Vec<LogEntry> =
            std::mem::take(self.buffer.get_mut().unwrap_or_else(PoisonError::into_inner)).into();
        if entries.is_empty() {
            return;
        }
        debug!(
            "LOGS | Logger {} dropped with {} buffered entries, flushing",
            self.id,
            entries.len()
        );
        let pipeline = Arc::clone(&self.shared.pipeline);
        self.shared.spawn(async move {
            if let Err(e) = pipeline.deliver(entries).await {
                error!("LOGS | Final flush of dropped logger failed: {e}");
            }
        });
    }
}

/// Exclusive right to flush one logger. Released on drop, even if the flush
/// future is cancelled or never polled.
struct FlushClaim(Arc<LoggerState>);

impl FlushClaim {
    fn try_new(state: &Arc<LoggerState>) -> Option<Self> {
        state
            .flush_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlushClaim(Arc::clone(state)))
    }

    /// Waits for any in-flight flush to finish, then claims.
    async fn acquire(state: &Arc<LoggerState>) -> Self {
        loop {
            let notified = state.flush_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(claim) = Self::try_new(state) {
                return claim;
            }
            notified.await;
        }
    }

    fn take_buffer(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.0.buffer()).into()
    }

    async fn run(self) -> FlushOutcome {
        let entries = self.take_buffer();
        if entries.is_empty() {
            return FlushOutcome::Empty;
        }
        let priority = recent_priority(&entries);

        match self.0.shared.pipeline.deliver(entries).await {
            Ok(report) => FlushOutcome::Completed(report),
            Err(e) => {
                let requeued = priority.len();
                error!(
                    "LOGS | Flush of logger {} failed: {e}, keeping {requeued} priority entries",
                    self.0.id
                );
                self.0.requeue(priority);
                FlushOutcome::Failed { requeued }
            }
        }
    }
}

impl Drop for FlushClaim {
    fn drop(&mut self) {
        self.0.flush_pending.store(false, Ordering::Release);
        self.0.flush_done.notify_waiters();
    }
}

/// The last `error`/`fatal` entries of `entries`, in order.
fn recent_priority(entries: &[LogEntry]) -> Vec<LogEntry> {
    let count = entries.iter().filter(|e| e.level.is_priority()).count();
    entries
        .iter()
        .filter(|e| e.level.is_priority())
        .skip(count.saturating_sub(MAX_REQUEUED_PRIORITY_ENTRIES))
        .cloned()
        .collect()
}

/// Handle to a logger instance. Clones share the same buffer.
#[derive(Clone)]
pub struct Logger {
    state: Arc<LoggerState>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("id", &self.state.id)
            .field("context", &self.state.context)
            .field("buffered", &self.buffered())
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Builds a root logger that reads the system clock and mirrors entries
    /// to `tracing` in development mode.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: LoggerConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        Self::from_parts(LoggerParts {
            config,
            transport,
            clock: Arc::new(SystemClock),
            console: Arc::new(TracingSink),
        })
    }

    pub fn from_parts(parts: LoggerParts) -> Result<Self, ConfigError> {
        let LoggerParts {
            config,
            transport,
            clock,
            console,
        } = parts;
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let pipeline = Arc::new(Pipeline::new(&config, transport, clock));
        let reconciler = Arc::new(pipeline.reconciler());
        let shared = Arc::new(Shared {
            config,
            pipeline,
            reconciler: Arc::clone(&reconciler),
            console,
            runtime,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            next_logger_id: AtomicU64::new(0),
            instances: Mutex::new(Vec::new()),
        });

        let cancel = shared.cancel.clone();
        shared.spawn(async move { reconciler.run(cancel).await });

        Ok(Self::register(shared, LogContext::default(), true))
    }

    fn register(shared: Arc<Shared>, context: LogContext, root: bool) -> Self {
        let state = Arc::new(LoggerState {
            id: shared.next_logger_id.fetch_add(1, Ordering::Relaxed),
            root,
            context,
            buffer: Mutex::new(VecDeque::with_capacity(shared.config.max_buffer_size)),
            flush_pending: AtomicBool::new(false),
            flush_done: Notify::new(),
            cancel: shared.cancel.child_token(),
            shared: Arc::clone(&shared),
        });
        {
            let mut instances = shared.instances.lock().unwrap_or_else(PoisonError::into_inner);
            instances.retain(|instance| instance.strong_count() > 0);
            instances.push(Arc::downgrade(&state));
        }
        if shared.config.mode == RuntimeMode::Production {
            start_periodic_flush(&state);
        }
        Logger { state }
    }

    /// A logger whose context is this logger's context deep-merged with
    /// `context`. It has its own buffer and timer and delivers through the
    /// same pipeline.
    #[must_use]
    pub fn child(&self, context: LogContext) -> Logger {
        let merged = self.state.context.merge(&context);
        Self::register(Arc::clone(&self.state.shared), merged, false)
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.state.id
    }

    #[must_use]
    pub fn context(&self) -> &LogContext {
        &self.state.context
    }

    #[must_use]
    pub fn config(&self) -> &LoggerConfig {
        &self.state.shared.config
    }

    /// Number of entries waiting for the next flush.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.state.buffer().len()
    }

    /// Batches currently held for long-term retry.
    #[must_use]
    pub fn failed_batches(&self) -> Vec<FailedBatch> {
        self.state.shared.pipeline.failed_batches()
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, data: Option<LogData>) {
        let shared = &self.state.shared;
        let entry = LogEntry::new(
            level,
            message,
            self.state.context.clone(),
            data,
            shared.config.source.as_str(),
            shared.config.environment.as_str(),
        );
        if shared.config.mode == RuntimeMode::Development {
            shared.console.emit(self.state.id, &entry);
        }
        if self.state.append(entry) {
            self.schedule_flush();
        }
    }

    fn log_serialized<T: Serialize + ?Sized>(&self, level: LogLevel, message: impl Into<String>, data: &T) {
        let data = LogData::from_serialize(data, self.state.shared.config.max_data_size_bytes);
        self.log(level, message, Some(data));
    }

    fn log_error<E: Error + ?Sized>(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        error: &E,
        data: Option<LogData>,
    ) {
        let info = ErrorInfo::capture(error);
        let data = data
            .unwrap_or_else(|| LogData::bounded(Value::Object(Map::new()), usize::MAX))
            .with_error(&info);
        let data = LogData::bounded(data.into_value(), self.state.shared.config.max_data_size_bytes);
        self.log(level, message, Some(data));
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, None);
    }

    pub fn fatal(&self, message: impl Into<String>) {
        self.log(LogLevel::Fatal, message, None);
    }

    pub fn debug_with<T: Serialize + ?Sized>(&self, message: impl Into<String>, data: &T) {
        self.log_serialized(LogLevel::Debug, message, data);
    }

    pub fn info_with<T: Serialize + ?Sized>(&self, message: impl Into<String>, data: &T) {
        self.log_serialized(LogLevel::Info, message, data);
    }

    pub fn warn_with<T: Serialize + ?Sized>(&self, message: impl Into<String>, data: &T) {
        self.log_serialized(LogLevel::Warn, message, data);
    }

    pub fn error_with<T: Serialize + ?Sized>(&self, message: impl Into<String>, data: &T) {
        self.log_serialized(LogLevel::Error, message, data);
    }

    pub fn fatal_with<T: Serialize + ?Sized>(&self, message: impl Into<String>, data: &T) {
        self.log_serialized(LogLevel::Fatal, message, data);
    }

    /// Logs at `error` with the name, message and cause chain of `error`
    /// under `data.error`.
    pub fn error_from<E: Error + ?Sized>(&self, message: impl Into<String>, error: &E) {
        self.log_error(LogLevel::Error, message, error, None);
    }

    pub fn fatal_from<E: Error + ?Sized>(&self, message: impl Into<String>, error: &E) {
        self.log_error(LogLevel::Fatal, message, error, None);
    }

    /// Like [`Logger::error_from`], keeping `data` alongside the error.
    pub fn error_from_with<E, T>(&self, message: impl Into<String>, error: &E, data: &T)
    where
        E: Error + ?Sized,
        T: Serialize + ?Sized,
    {
        let data = LogData::from_serialize(data, usize::MAX);
        self.log_error(LogLevel::Error, message, error, Some(data));
    }

    pub fn fatal_from_with<E, T>(&self, message: impl Into<String>, error: &E, data: &T)
    where
        E: Error + ?Sized,
        T: Serialize + ?Sized,
    {
        let data = LogData::from_serialize(data, usize::MAX);
        self.log_error(LogLevel::Fatal, message, error, Some(data));
    }

    fn schedule_flush(&self) {
        if let Some(claim) = FlushClaim::try_new(&self.state) {
            self.state.shared.spawn(claim.run());
        }
    }

    /// Starts a flush in the background without waiting for it.
    ///
    /// Meant for teardown signals such as the host losing visibility, where
    /// the caller cannot block.
    pub fn notify_visibility_lost(&self) {
        debug!("LOGS | Visibility lost, flushing logger {}", self.state.id);
        self.schedule_flush();
    }

    /// Flushes the buffer now and waits for the send cycle to finish.
    ///
    /// Returns [`FlushOutcome::AlreadyInFlight`] without waiting if another
    /// flush of this logger is scheduled or running.
    pub async fn flush(&self) -> FlushOutcome {
        match FlushClaim::try_new(&self.state) {
            Some(claim) => claim.run().await,
            None => FlushOutcome::AlreadyInFlight,
        }
    }

    /// Runs one long-term retry pass immediately.
    pub async fn reconcile_now(&self) -> ReconcileReport {
        self.state.shared.reconciler.tick().await
    }

    /// Stops timers, performs a final flush and waits for background work,
    /// all within `shutdown_grace`.
    ///
    /// On the root logger this covers every logger created from it: their
    /// buffers are flushed together in one send cycle, the reconciler is
    /// stopped, and the pipeline refuses later deliveries. On a child logger
    /// only that logger is stopped and flushed.
    pub async fn shutdown(&self) -> ShutdownStatus {
        let shared = &self.state.shared;
        let is_root = self.state.root;
        if is_root {
            shared.cancel.cancel();
        } else {
            self.state.cancel.cancel();
        }

        let work = async {
            let instances = if is_root {
                shared.live_instances()
            } else {
                vec![Arc::clone(&self.state)]
            };
            self.final_flush(&instances).await;
            if is_root {
                shared.tracker.close();
                shared.tracker.wait().await;
            }
        };

        let status = match timeout(shared.config.shutdown_grace, work).await {
            Ok(()) => ShutdownStatus::Clean,
            Err(_) => {
                warn!(
                    "LOGS | Shutdown of logger {} did not finish within {:?}",
                    self.state.id, shared.config.shutdown_grace
                );
                ShutdownStatus::TimedOut
            }
        };
        if is_root {
            shared.pipeline.close();
        }
        status
    }

    async fn final_flush(&self, instances: &[Arc<LoggerState>]) {
        let mut claims = Vec::with_capacity(instances.len());
        let mut entries = Vec::new();
        for instance in instances {
            let claim = FlushClaim::acquire(instance).await;
            entries.extend(claim.take_buffer());
            claims.push(claim);
        }
        if entries.is_empty() {
            return;
        }

        let pipeline = &self.state.shared.pipeline;
        let wait = pipeline.rate_limit_remaining();
        if !wait.is_zero() {
            sleep(wait).await;
        }
        match pipeline.deliver(entries).await {
            Ok(report) => debug!("LOGS | Final flush finished: {report:?}"),
            Err(e) => error!("LOGS | Final flush failed: {e}"),
        }
    }
}

fn start_periodic_flush(state: &Arc<LoggerState>) {
    let weak = Arc::downgrade(state);
    let cancel = state.cancel.clone();
    let config = &state.shared.config;
    let period = config.periodic_flush_interval;
    let offset = first_tick_offset(period, config.min_send_interval, &mut fastrand::Rng::new());

    state.shared.spawn(async move {
        let mut ticker = interval_at(Instant::now() + period + offset, period);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let Some(state) = weak.upgrade() else { return };
                    if let Some(claim) = FlushClaim::try_new(&state) {
                        claim.run().await;
                    }
                }
            }
        }
    });
}

/// Random delay added to a logger's first periodic tick, so loggers sharing
/// a pipeline do not all hit its rate limiter at the same instant. Bounded by
/// twice `min_send_interval` and by `period`.
fn first_tick_offset(period: Duration, min_send_interval: Duration, rng: &mut fastrand::Rng) -> Duration {
    let spread = min_send_interval.saturating_mul(2).min(period);
    spread.mul_f64(rng.f64())
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local, human-readable output.
//!
//! In development mode every entry is mirrored to a [`ConsoleSink`]. The
//! default [`TracingSink`] re-emits entries as `tracing` events under the
//! `logship::console` target, so they end up wherever the host process sends
//! its own logs. The sink never fails and never feeds back into delivery.
//!
//! [`Formatter`] renders events as
//! ```text
//! LOGSHIP | LEVEL | [span{fields}: ]message fields
//! ```

use crate::entry::{LogEntry, LogLevel};
use std::fmt;
use tracing::{debug, error, info, warn};
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

pub const CONSOLE_TARGET: &str = "logship::console";

pub trait ConsoleSink: Send + Sync {
    fn emit(&self, logger_id: u64, entry: &LogEntry);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ConsoleSink for TracingSink {
    fn emit(&self, logger_id: u64, entry: &LogEntry) {
        let feature = entry.context.feature.as_deref().unwrap_or("-");
        let action = entry.context.action.as_deref().unwrap_or("-");
        let data = entry
            .data
            .as_ref()
            .map(|data| data.as_value().to_string())
            .unwrap_or_default();
        let message = entry.message.as_str();

        match entry.level {
            LogLevel::Debug => {
                debug!(target: CONSOLE_TARGET, logger_id, feature, action, data = %data, "{message}");
            }
            LogLevel::Info => {
                info!(target: CONSOLE_TARGET, logger_id, feature, action, data = %data, "{message}");
            }
            LogLevel::Warn => {
                warn!(target: CONSOLE_TARGET, logger_id, feature, action, data = %data, "{message}");
            }
            LogLevel::Error => {
                error!(target: CONSOLE_TARGET, logger_id, feature, action, data = %data, "{message}");
            }
            LogLevel::Fatal => {
                error!(target: CONSOLE_TARGET, logger_id, feature, action, data = %data, fatal = true, "{message}");
            }
        }
    }
}

/// Line formatter for the agent's own diagnostics.
///
/// Each event becomes one line: the `LOGSHIP` tag, the level, the chain of
/// entered spans from the root with their recorded fields, then the event's
/// message and fields. Timestamps and targets are left out; the agent runs
/// under a supervisor that stamps every line of its stderr already.
///
/// ```text
/// LOGSHIP | WARN | flush{logger_id=2}: LOGS | Rate limited, dropping entries=12
/// ```
///
/// Install it with
/// [`SubscriberBuilder::event_format`](tracing_subscriber::fmt::SubscriberBuilder::event_format).
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl Formatter {
    /// Writes `name{fields}: ` for every span the event is nested in.
    fn write_scope<S, N>(ctx: &FmtContext<'_, S, N>, writer: &mut format::Writer<'_>) -> fmt::Result
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
        N: for<'a> FormatFields<'a> + 'static,
    {
        let Some(scope) = ctx.event_scope() else {
            return Ok(());
        };
        for span in scope.from_root() {
            let extensions = span.extensions();
            match extensions.get::<FormattedFields<N>>() {
                Some(fields) if !fields.is_empty() => write!(writer, "{}{{{fields}}}: ", span.name())?,
                _ => write!(writer, "{}: ", span.name())?,
            }
        }
        Ok(())
    }
}

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "LOGSHIP | {} | ", event.metadata().level())?;
        Self::write_scope(ctx, &mut writer)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

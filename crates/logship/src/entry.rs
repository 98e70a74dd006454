// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured log events and the context they are captured with.
//!
//! A [`LogEntry`] is built once by the [`crate::logger::Logger`] and never
//! mutated afterwards. Everything that travels to the collector is serialized
//! from this type, so the serde representation below *is* the wire format:
//!
//! ```json
//! {
//!   "id": "1718000000000-k3j9x0a2b",
//!   "timestamp": "2024-06-10T06:13:20.000Z",
//!   "level": "warn",
//!   "message": "slot overlap detected",
//!   "context": {"sessionId": "s-1", "feature": "calendar"},
//!   "data": {"slot": 4},
//!   "source": "scheduler-web",
//!   "environment": "production"
//! }
//! ```

use chrono::{SecondsFormat, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use tracing::warn;

/// Length of the random part of an entry id.
const ID_SUFFIX_LEN: usize = 9;

/// Number of bytes of an oversized payload kept as a preview.
const TRUNCATED_PREVIEW_BYTES: usize = 256;

/// Severity of a log entry.
///
/// Variants are declared in ascending severity so the derived `Ord` can be
/// used directly for prioritization.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[display("debug")]
    Debug,
    #[display("info")]
    Info,
    #[display("warn")]
    Warn,
    #[display("error")]
    Error,
    #[display("fatal")]
    Fatal,
}

impl LogLevel {
    /// Priority entries bypass deduplication and survive demotion.
    #[must_use]
    pub fn is_priority(self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Fatal)
    }

    /// Parses a level name, case-insensitively. `warning` is accepted for `warn`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "fatal" => Some(LogLevel::Fatal),
            _ => None,
        }
    }
}

/// Identifiers describing where a log entry was emitted from.
///
/// All fields are optional; a child logger overlays its own context on top of
/// its parent's with [`LogContext::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Free-form identifiers, flattened into the context object on the wire.
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl LogContext {
    #[must_use]
    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Returns `self` overlaid with every field set in `overlay`.
    ///
    /// Identifier fields are replaced when the overlay sets them. `extra` is
    /// merged recursively: nested objects are combined key by key, any other
    /// value in the overlay wins.
    #[must_use]
    pub fn merge(&self, overlay: &LogContext) -> LogContext {
        let mut extra = self.extra.clone();
        deep_merge(&mut extra, &overlay.extra);
        LogContext {
            session_id: overlay
                .session_id
                .clone()
                .or_else(|| self.session_id.clone()),
            feature: overlay.feature.clone().or_else(|| self.feature.clone()),
            action: overlay.action.clone().or_else(|| self.action.clone()),
            user_id: overlay.user_id.clone().or_else(|| self.user_id.clone()),
            extra,
        }
    }
}

fn deep_merge(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Structured payload attached to a log entry.
///
/// Construction never fails: values that cannot be serialized, or whose JSON
/// form exceeds the configured size bound, are replaced by a small marker
/// object describing what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogData(Value);

impl LogData {
    /// Serializes `value` and bounds its encoded size to `max_size_bytes`.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T, max_size_bytes: usize) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Self::bounded(value, max_size_bytes),
            Err(e) => {
                warn!("LOGS | Failed to serialize log data, replacing payload: {e}");
                let mut marker = Map::new();
                marker.insert("serializationError".to_string(), Value::from(e.to_string()));
                LogData(Value::Object(marker))
            }
        }
    }

    /// Wraps an already-built JSON value, applying the size bound.
    #[must_use]
    pub fn bounded(value: Value, max_size_bytes: usize) -> Self {
        let encoded = value.to_string();
        if encoded.len() <= max_size_bytes {
            return LogData(value);
        }
        warn!(
            "LOGS | Log data of {} bytes exceeds the {} byte limit, truncating",
            encoded.len(),
            max_size_bytes
        );
        let mut marker = Map::new();
        marker.insert("truncated".to_string(), Value::Bool(true));
        marker.insert("originalSize".to_string(), Value::from(encoded.len()));
        marker.insert(
            "preview".to_string(),
            Value::from(char_prefix(&encoded, TRUNCATED_PREVIEW_BYTES)),
        );
        LogData(Value::Object(marker))
    }

    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Merges a description of `error` into the payload under the `error` key.
    ///
    /// A payload that is not a JSON object is kept under `value`.
    #[must_use]
    pub fn with_error(self, error: &ErrorInfo) -> Self {
        let mut object = match self.0 {
            Value::Object(object) => object,
            Value::Null => Map::new(),
            other => {
                let mut object = Map::new();
                object.insert("value".to_string(), other);
                object
            }
        };
        object.insert("error".to_string(), error.to_value());
        LogData(Value::Object(object))
    }
}

/// Returns the longest prefix of `value` not exceeding `max_bytes`, cut on a
/// character boundary.
pub(crate) fn char_prefix(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Name, message and cause chain of an error, as merged into `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    pub stack: Vec<String>,
}

impl ErrorInfo {
    /// Captures `error`. The name is the short type name of `E`; the stack is
    /// the chain of `source()` causes, outermost first.
    pub fn capture<E: Error + ?Sized>(error: &E) -> Self {
        let full_name = std::any::type_name::<E>();
        let name = full_name
            .rsplit("::")
            .next()
            .unwrap_or(full_name)
            .to_string();
        let mut stack = Vec::new();
        let mut cause = error.source();
        while let Some(inner) = cause {
            stack.push(inner.to_string());
            cause = inner.source();
        }
        ErrorInfo {
            name,
            message: error.to_string(),
            stack,
        }
    }

    fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("name".to_string(), Value::from(self.name.clone()));
        object.insert("message".to_string(), Value::from(self.message.clone()));
        object.insert(
            "stack".to_string(),
            Value::Array(self.stack.iter().cloned().map(Value::from).collect()),
        );
        Value::Object(object)
    }
}

/// A single immutable log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Correlation id: creation time in milliseconds and a random suffix.
    /// Never part of the deduplication key.
    pub id: String,
    /// RFC 3339 creation time in UTC.
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    pub context: LogContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<LogData>,
    pub source: String,
    pub environment: String,
}

impl LogEntry {
    /// Builds an entry stamped with the current wall-clock time and a fresh id.
    #[must_use]
    pub fn new(
        level: LogLevel,
        message: impl Into<String>,
        context: LogContext,
        data: Option<LogData>,
        source: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        LogEntry {
            id: generate_id(now.timestamp_millis()),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            message: message.into(),
            context,
            data,
            source: source.into(),
            environment: environment.into(),
        }
    }

    /// Size of this entry's JSON encoding in bytes.
    #[cfg(test)]
    pub(crate) fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map_or(0, |bytes| bytes.len())
    }
}

fn generate_id(millis: i64) -> String {
    let suffix: String = std::iter::repeat_with(fastrand::alphanumeric)
        .take(ID_SUFFIX_LEN)
        .collect::<String>()
        .to_ascii_lowercase();
    format!("{millis}-{suffix}")
}

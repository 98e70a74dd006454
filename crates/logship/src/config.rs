// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "LOGSHIP_";

/// Whether the logger runs against the real collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    /// Periodic flushing is enabled; nothing is mirrored to the console.
    Production,
    /// Entries are mirrored to the console sink and the periodic timer is off.
    /// Buffer-full and critical-pressure flushes still ship entries.
    Development,
}

impl RuntimeMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Some(RuntimeMode::Production),
            "development" | "dev" => Some(RuntimeMode::Development),
            _ => None,
        }
    }
}

/// Configuration for the logger and its delivery pipeline.
///
/// All values are fixed at construction time.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Base URL of the collector; entries are POSTed to `<collector_url>/logs`.
    pub collector_url: String,
    /// Identifier of the emitting application, stamped on every entry.
    pub source: String,
    /// Build/deployment identifier, stamped on every entry.
    pub environment: String,
    pub mode: RuntimeMode,

    /// Hard cap on buffered entries; reaching it triggers a flush.
    pub max_buffer_size: usize,
    /// Buffer length that triggers a flush once an error/fatal entry is buffered.
    pub critical_pressure_threshold: usize,
    pub periodic_flush_interval: Duration,

    pub deduplication_window: Duration,
    /// Maximum number of remembered deduplication keys.
    pub max_cache_size: usize,

    pub max_batch_size: usize,
    pub max_payload_size_bytes: usize,
    pub min_send_interval: Duration,
    /// Pause between consecutive batches of one flush cycle.
    pub inter_batch_delay: Duration,

    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    /// Upper bound of the random jitter added to each short-term retry delay.
    pub max_jitter: Duration,
    /// Bound on a single delivery attempt.
    pub send_timeout: Duration,

    pub max_failed_batches: usize,
    pub max_failed_batch_age: Duration,
    pub max_long_term_retries: u32,
    pub background_retry_interval: Duration,

    /// How long `shutdown` waits for in-flight work.
    pub shutdown_grace: Duration,
    /// Bound on the JSON size of an entry's `data`.
    pub max_data_size_bytes: usize,

    pub use_compression: bool,
    pub compression_level: i32,
    pub https_proxy: Option<String>,
    /// Level filter for the pipeline's own diagnostics.
    pub log_level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            collector_url: "http://127.0.0.1:8080".to_string(),
            source: "logship".to_string(),
            environment: "development".to_string(),
            mode: RuntimeMode::Production,
            max_buffer_size: 100,
            critical_pressure_threshold: 10,
            periodic_flush_interval: Duration::from_secs(30),
            deduplication_window: Duration::from_secs(60),
            max_cache_size: 1000,
            max_batch_size: 50,
            max_payload_size_bytes: 64 * 1024,
            min_send_interval: Duration::from_secs(1),
            inter_batch_delay: Duration::from_millis(100),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_jitter: Duration::from_secs(1),
            send_timeout: Duration::from_secs(10),
            max_failed_batches: 10,
            max_failed_batch_age: Duration::from_secs(24 * 60 * 60),
            max_long_term_retries: 5,
            background_retry_interval: Duration::from_secs(30 * 60),
            shutdown_grace: Duration::from_secs(2),
            max_data_size_bytes: 16 * 1024,
            use_compression: false,
            compression_level: 3,
            https_proxy: None,
            log_level: "info".to_string(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ConfigError::InvalidConfig(format!("{ENV_PREFIX}{name} has invalid value '{raw}'"))
        }),
    }
}

fn env_millis(name: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_millis))
}

impl LoggerConfig {
    /// Create configuration from `LOGSHIP_*` environment variables, falling
    /// back to the defaults for anything unset.
    ///
    /// Durations are read in milliseconds (`LOGSHIP_MIN_SEND_INTERVAL_MS`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = env_var("COLLECTOR_URL") {
            config.collector_url = url;
        }
        if let Some(source) = env_var("SOURCE") {
            config.source = source;
        }
        if let Some(environment) = env_var("ENVIRONMENT") {
            config.environment = environment;
        }
        if let Some(mode) = env_var("MODE") {
            config.mode = RuntimeMode::parse(&mode).ok_or_else(|| {
                ConfigError::InvalidConfig(format!(
                    "Invalid mode '{mode}'. Must be one of: production, development"
                ))
            })?;
        }

        macro_rules! override_from_env {
            ($field:ident, $name:literal, parse) => {
                if let Some(value) = env_parse($name)? {
                    config.$field = value;
                }
            };
            ($field:ident, $name:literal, millis) => {
                if let Some(value) = env_millis($name)? {
                    config.$field = value;
                }
            };
        }

        override_from_env!(max_buffer_size, "MAX_BUFFER_SIZE", parse);
        override_from_env!(critical_pressure_threshold, "CRITICAL_PRESSURE_THRESHOLD", parse);
        override_from_env!(periodic_flush_interval, "PERIODIC_FLUSH_INTERVAL_MS", millis);
        override_from_env!(deduplication_window, "DEDUPLICATION_WINDOW_MS", millis);
        override_from_env!(max_cache_size, "MAX_CACHE_SIZE", parse);
        override_from_env!(max_batch_size, "MAX_BATCH_SIZE", parse);
        override_from_env!(max_payload_size_bytes, "MAX_PAYLOAD_SIZE_BYTES", parse);
        override_from_env!(min_send_interval, "MIN_SEND_INTERVAL_MS", millis);
        override_from_env!(inter_batch_delay, "INTER_BATCH_DELAY_MS", millis);
        override_from_env!(max_retries, "MAX_RETRIES", parse);
        override_from_env!(base_delay, "BASE_DELAY_MS", millis);
        override_from_env!(backoff_multiplier, "BACKOFF_MULTIPLIER", parse);
        override_from_env!(max_jitter, "MAX_JITTER_MS", millis);
        override_from_env!(send_timeout, "SEND_TIMEOUT_MS", millis);
        override_from_env!(max_failed_batches, "MAX_FAILED_BATCHES", parse);
        override_from_env!(max_failed_batch_age, "MAX_FAILED_BATCH_AGE_MS", millis);
        override_from_env!(max_long_term_retries, "MAX_LONG_TERM_RETRIES", parse);
        override_from_env!(background_retry_interval, "BACKGROUND_RETRY_INTERVAL_MS", millis);
        override_from_env!(shutdown_grace, "SHUTDOWN_GRACE_MS", millis);
        override_from_env!(max_data_size_bytes, "MAX_DATA_SIZE_BYTES", parse);
        override_from_env!(compression_level, "COMPRESSION_LEVEL", parse);

        if let Some(value) = env_var("USE_COMPRESSION") {
            config.use_compression = value.to_lowercase() == "true";
        }
        config.https_proxy = env_var("PROXY_HTTPS").or_else(|| env::var("HTTPS_PROXY").ok());
        if let Some(level) = env_var("LOG_LEVEL") {
            config.log_level = level.to_lowercase();
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.collector_url.trim();
        if url.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "collector_url cannot be empty".to_string(),
            ));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidConfig(format!(
                "collector_url '{url}' must start with http:// or https://"
            )));
        }

        if self.max_buffer_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.critical_pressure_threshold == 0
            || self.critical_pressure_threshold >= self.max_buffer_size
        {
            return Err(ConfigError::InvalidConfig(format!(
                "critical_pressure_threshold must be between 1 and max_buffer_size ({}) exclusive",
                self.max_buffer_size
            )));
        }
        if self.max_batch_size == 0 || self.max_payload_size_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_batch_size and max_payload_size_bytes must be greater than 0".to_string(),
            ));
        }
        if self.max_cache_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_cache_size must be greater than 0".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_failed_batches == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_failed_batches must be greater than 0".to_string(),
            ));
        }
        if self.periodic_flush_interval.is_zero() || self.background_retry_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "flush and background retry intervals must be non-zero".to_string(),
            ));
        }
        if self.send_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "send_timeout must be non-zero".to_string(),
            ));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(ConfigError::InvalidConfig(format!(
                "compression_level must be between 1 and 22, got {}",
                self.compression_level
            )));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error, off",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Full URL entries are POSTed to.
    #[must_use]
    pub fn logs_url(&self) -> String {
        format!("{}/logs", self.collector_url.trim().trim_end_matches('/'))
    }
}

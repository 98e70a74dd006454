// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while building or validating a [`crate::config::LoggerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Logger must be created from within a tokio runtime")]
    NoRuntime,
}

/// A single delivery attempt failed. Every variant is retryable.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Collector responded with status {0}")]
    Status(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u128),

    #[error("Failed to encode payload: {0}")]
    Encoding(String),
}

/// The downstream pipeline could not process a flushed buffer.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to serialize batch: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Pipeline is shut down")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::InvalidConfig("max_buffer_size must be greater than 0".into());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: max_buffer_size must be greater than 0"
        );
        assert_eq!(
            SendError::Status(503).to_string(),
            "Collector responded with status 503"
        );
        assert_eq!(
            SendError::Timeout(1500).to_string(),
            "Request timed out after 1500 ms"
        );
    }

    #[test]
    fn test_pipeline_error_from_serde() {
        let serde_error = serde_json::from_str::<u8>("nope").unwrap_err();
        let error = PipelineError::from(serde_error);
        assert!(error.to_string().starts_with("Failed to serialize batch"));
    }
}

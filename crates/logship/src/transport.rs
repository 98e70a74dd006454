// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of a batch to the remote collector.
//!
//! The pipeline only talks to the [`Transport`] trait; [`HttpTransport`] is
//! the production implementation, posting a JSON array of entries to
//! `<collector_url>/logs`. Any 2xx response is a success. Every other status
//! and every network error is reported as a retryable [`SendError`].

use crate::config::LoggerConfig;
use crate::entry::LogEntry;
use crate::error::SendError;
use crate::http::get_client;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use std::io::Write;
use std::time::Instant;
use tracing::debug;
use zstd::stream::write::Encoder;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Attempts one delivery of `batch`.
    async fn send(&self, batch: &[LogEntry]) -> Result<(), SendError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    compression_level: Option<i32>,
}

impl HttpTransport {
    #[must_use]
    pub fn new(config: &LoggerConfig) -> Self {
        Self::with_client(get_client(config), config)
    }

    /// Uses an existing client, e.g. one shared with other components.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: &LoggerConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if config.use_compression {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        }
        HttpTransport {
            client,
            url: config.logs_url(),
            headers,
            compression_level: config.use_compression.then_some(config.compression_level),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn encode(&self, batch: &[LogEntry]) -> Result<Vec<u8>, SendError> {
        let body = serde_json::to_vec(batch).map_err(|e| SendError::Encoding(e.to_string()))?;
        match self.compression_level {
            None => Ok(body),
            Some(level) => compress(&body, level).map_err(|e| SendError::Encoding(e.to_string())),
        }
    }
}

fn compress(data: &[u8], level: i32) -> std::io::Result<Vec<u8>> {
    let mut encoder = Encoder::new(Vec::new(), level)?;
    encoder.write_all(data)?;
    encoder.finish()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &[LogEntry]) -> Result<(), SendError> {
        let body = self.encode(batch)?;
        let started = Instant::now();

        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SendError::Timeout(started.elapsed().as_millis())
                } else {
                    SendError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(
                "LOGS | Delivered {} entries in {} ms",
                batch.len(),
                started.elapsed().as_millis()
            );
            Ok(())
        } else {
            Err(SendError::Status(status.as_u16()))
        }
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Construction of the shared, connection-pooled HTTP client.
//!
//! One client is built per pipeline and reused for every delivery, including
//! the background reconciler's retries.

use crate::config::LoggerConfig;
use crate::constants::USER_AGENT;
use std::error::Error;
use std::time::Duration;
use tracing::error;

/// Idle pooled connections are closed after this long.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(270);
const TCP_KEEPALIVE: Duration = Duration::from_secs(120);

/// Builds the HTTP client for `config`.
///
/// An unusable proxy setting is logged and the client falls back to a direct
/// connection so logs keep flowing.
#[must_use]
pub fn get_client(config: &LoggerConfig) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "LOGS | Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(config, false) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "LOGS | Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(
    config: &LoggerConfig,
    allow_proxy: bool,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.send_timeout)
        .pool_idle_timeout(Some(POOL_IDLE_TIMEOUT))
        .tcp_keepalive(Some(TCP_KEEPALIVE));

    if allow_proxy {
        if let Some(https_uri) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(https_uri.as_str())?;
            client = client.proxy(proxy);
        }
    }

    Ok(client.build()?)
}

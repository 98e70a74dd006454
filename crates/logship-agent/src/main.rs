// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use logship::{
    console::Formatter, HttpTransport, LogLevel, Logger, LoggerConfig, ShutdownStatus,
};

#[tokio::main]
pub async fn main() {
    let config = match LoggerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("LOGSHIP | ERROR | Error creating config on logship agent startup: {e}");
            return;
        }
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level);
    let env_filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("LOGSHIP | ERROR | Could not parse log level in configuration: {e}");
            return;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .event_format(Formatter)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("LOGSHIP | ERROR | Setting default subscriber failed: {e}");
        return;
    }

    debug!("Logging subsystem enabled");

    let transport = Arc::new(HttpTransport::new(&config));
    info!("Shipping stdin lines to {}", transport.url());
    let logger = match Logger::new(config, transport) {
        Ok(logger) => logger,
        Err(e) => {
            error!("Error creating logger on logship agent startup: {e}");
            return;
        }
    };

    let cancel_token = CancellationToken::new();
    tokio::spawn({
        let cancel_token = cancel_token.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received interrupt, shutting down"),
                Err(e) => warn!("Unable to listen for interrupt signal: {e}"),
            }
            cancel_token.cancel();
        }
    });

    ship_stdin(&logger, &cancel_token).await;

    match logger.shutdown().await {
        ShutdownStatus::Clean => debug!("Logship agent stopped"),
        ShutdownStatus::TimedOut => warn!("Logship agent stopped before all logs were delivered"),
    }
}

/// Logs every stdin line until EOF or cancellation.
async fn ship_stdin(logger: &Logger, cancel_token: &CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => return,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some((level, message)) = parse_line(&line) {
                        logger.log(level, message, None);
                    }
                }
                Ok(None) => {
                    debug!("Reached end of input");
                    return;
                }
                Err(e) => {
                    error!("Failed to read from stdin: {e}");
                    return;
                }
            },
        }
    }
}

/// Splits `LEVEL message`. A line without a known level is logged at `info`
/// in full; blank lines are skipped.
fn parse_line(line: &str) -> Option<(LogLevel, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.split_once(char::is_whitespace) {
        Some((first, rest)) => match LogLevel::parse(first) {
            Some(level) => Some((level, rest.trim_start())),
            None => Some((LogLevel::Info, line)),
        },
        None => Some((LogLevel::Info, line)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_with_level() {
        assert_eq!(
            parse_line("ERROR payment failed"),
            Some((LogLevel::Error, "payment failed"))
        );
        assert_eq!(
            parse_line("warning   disk almost full"),
            Some((LogLevel::Warn, "disk almost full"))
        );
    }

    #[test]
    fn test_parse_line_defaults_to_info() {
        assert_eq!(
            parse_line("server started on :8080"),
            Some((LogLevel::Info, "server started on :8080"))
        );
        assert_eq!(parse_line("hello"), Some((LogLevel::Info, "hello")));
    }

    #[test]
    fn test_parse_line_skips_blank() {
        assert_eq!(parse_line("   "), None);
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};

use loggly_transport::{facade, LogglyTransport, Meta, TransportConfig};
use serde_json::Value;

const DEFAULT_FORWARD_LEVEL: &str = "info";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOGGLY_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let forward_level = env::var("LOGGLY_FORWARD_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or(DEFAULT_FORWARD_LEVEL.to_string());

    let config = match TransportConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // No subscriber yet, stderr is all there is.
            eprintln!("Error creating Loggly transport config: {e}");
            return;
        }
    };
    let transport = match LogglyTransport::new(config) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Error starting Loggly transport: {e}");
            return;
        }
    };

    // Silence the HTTP stack unless explicitly asked for
    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");
    if let Err(e) = facade::try_init(transport.clone(), &env_filter) {
        eprintln!("Error installing log subscriber: {e}");
        return;
    }

    info!("Forwarding stdin to Loggly");
    tokio::select! {
        () = forward_stdin(&transport, &forward_level) => debug!("Reached end of stdin"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted, flushing buffered logs"),
    }

    transport.close().await;
}

async fn forward_stdin(transport: &LogglyTransport, default_level: &str) {
    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some((level, message, meta)) = parse_line(&line, default_level) {
                    transport.log(&level, &message, meta, None);
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {e}");
                break;
            }
        }
    }
}

/// Turns one input line into `(level, message, meta)`.
///
/// JSON objects provide their own `level` and `message`, every other key becomes
/// meta. Anything else is forwarded verbatim at `default_level`. Blank lines are skipped.
fn parse_line(line: &str, default_level: &str) -> Option<(String, String, Option<Meta>)> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(trimmed) else {
        return Some((default_level.to_string(), line.to_string(), None));
    };

    let level = match fields.remove("level") {
        Some(Value::String(level)) => level,
        _ => default_level.to_string(),
    };
    let message = match fields.remove("message") {
        Some(Value::String(message)) => message,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let meta = (!fields.is_empty()).then_some(fields);
    Some((level, message, meta))
}

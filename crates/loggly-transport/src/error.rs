// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the Loggly transport.
//!
//! Three families of errors exist:
//! - [`TransportError`]: fatal, raised synchronously while constructing a transport
//! - [`SinkError`]: recoverable, produced once per failed batch and shared by every
//!   entry of that batch
//! - [`FacadeError`]: raised by the `tracing` glue when it is wired twice

/// Maximum number of characters of a response body kept in a [`SinkError::Status`].
pub(crate) const MAX_BODY_SUMMARY_CHARS: usize = 256;

/// Errors raised while building a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid configuration: missing Loggly subdomain")]
    MissingSubdomain,

    #[error("Invalid configuration: missing Loggly customer token")]
    MissingToken,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Error produced when a batch could not be delivered to the sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The sink answered with a non-2xx status code.
    #[error("{sink} Error ({status}): {body}")]
    Status {
        sink: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response (DNS, connect, TLS, proxy...).
    #[error("{sink} Error: {source}")]
    Request {
        sink: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{sink} Error: failed to encode batch: {source}")]
    Encode {
        sink: String,
        #[source]
        source: serde_json::Error,
    },

    /// Generic failure for sinks that are not HTTP based.
    #[error("{sink} Error: {message}")]
    Other { sink: String, message: String },

    /// The transport was closed before the entry could be buffered.
    ///
    /// Raised by the transport itself, never by a sink: it only reaches the entry's
    /// callback and is never published as a `TransportEvent::Error`.
    #[error("Transport closed: log entry was not buffered")]
    Closed,
}

impl SinkError {
    /// Builds a [`SinkError::Status`] from a raw response body.
    ///
    /// JSON bodies carrying an `error` or `message` field are reduced to that field.
    pub fn from_response(sink: impl Into<String>, status: u16, body: &str) -> Self {
        SinkError::Status {
            sink: sink.into(),
            status,
            body: summarize_body(body),
        }
    }

    /// `false` for failures raised by the transport lifecycle rather than a send.
    #[must_use]
    pub fn is_sink_failure(&self) -> bool {
        !matches!(self, SinkError::Closed)
    }

    /// HTTP-like status code, if the sink answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            SinkError::Status { status, .. } => Some(*status),
            SinkError::Request { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn summarize_body(body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["error", "message"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_owned))
        });
    let summary = from_json.unwrap_or_else(|| body.trim().to_string());
    if summary.chars().count() > MAX_BODY_SUMMARY_CHARS {
        let mut truncated: String = summary.chars().take(MAX_BODY_SUMMARY_CHARS).collect();
        truncated.push_str("...");
        truncated
    } else {
        summary
    }
}

/// Errors raised by the `tracing` facade glue.
#[derive(Debug, thiserror::Error)]
pub enum FacadeError {
    #[error("A global log subscriber is already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log sinks: where flushed batches end up.
//!
//! [`LogSink`] is the bulk-send contract the dispatcher relies on. [`LogglySink`]
//! implements it against the Loggly bulk endpoint:
//!
//! ```text
//! POST {endpoint}/bulk/{token}
//! X-LOGGLY-TAG: tagA,tagB
//!
//! {"level":"info","message":"Message A","timestamp":"..."}
//! {"level":"warn","message":"Message B","timestamp":"...","tags":["tagA","tagB","foo"]}
//! ```

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::config::{BasicAuth, TransportConfig};
use crate::error::{SinkError, TransportError};
use crate::event::LogEvent;
use crate::http::get_client;

pub const LOGGLY_SINK_NAME: &str = "Loggly";
pub const TAG_HEADER: &str = "X-LOGGLY-TAG";

#[async_trait]
pub trait LogSink: Send + Sync {
    /// Human readable name, used as the prefix of error messages.
    fn name(&self) -> &str;

    /// Sends `events` as a single request. `default_tags` apply to the whole request
    /// when the sink supports request level tags.
    async fn bulk_send(&self, events: &[LogEvent], default_tags: &[String])
        -> Result<(), SinkError>;
}

#[derive(Debug, Clone)]
pub struct LogglySink {
    client: reqwest::Client,
    bulk_url: String,
    auth: Option<BasicAuth>,
}

impl LogglySink {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        config.validate()?;
        Ok(Self::with_client(get_client(config)?, config))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, config: &TransportConfig) -> Self {
        LogglySink {
            client,
            bulk_url: config.bulk_url(),
            auth: config.auth.clone(),
        }
    }

    fn encode_error(source: serde_json::Error) -> SinkError {
        SinkError::Encode {
            sink: LOGGLY_SINK_NAME.to_string(),
            source,
        }
    }
}

#[async_trait]
impl LogSink for LogglySink {
    fn name(&self) -> &str {
        LOGGLY_SINK_NAME
    }

    async fn bulk_send(
        &self,
        events: &[LogEvent],
        default_tags: &[String],
    ) -> Result<(), SinkError> {
        let body = encode_ndjson(events).map_err(Self::encode_error)?;

        let mut request = self
            .client
            .post(&self.bulk_url)
            .header(CONTENT_TYPE, "text/plain")
            .body(body);
        if !default_tags.is_empty() {
            request = request.header(TAG_HEADER, default_tags.join(","));
        }
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request.send().await.map_err(|source| SinkError::Request {
            sink: LOGGLY_SINK_NAME.to_string(),
            source,
        })?;

        let status = response.status();
        if status.is_success() {
            debug!("LOGGLY | Bulk request accepted: {} events", events.len());
            return Ok(());
        }

        // Don't fail twice: an unreadable body still yields the status error
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::from_response(
            LOGGLY_SINK_NAME,
            status.as_u16(),
            &body,
        ))
    }
}

/// One JSON document per line, no trailing newline.
pub fn encode_ndjson(events: &[LogEvent]) -> Result<String, serde_json::Error> {
    let lines = events
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::{json, Value};

    fn events(messages: &[&str]) -> Vec<LogEvent> {
        messages
            .iter()
            .map(|m| LogEvent::new("info", m, None, &[]))
            .collect()
    }

    fn sink_for(server: &Server, config: TransportConfig) -> LogglySink {
        LogglySink::new(&TransportConfig {
            endpoint: server.url(),
            ..config
        })
        .unwrap()
    }

    #[test]
    fn test_encode_ndjson() {
        let body = encode_ndjson(&events(&["a", "b"])).unwrap();
        let lines: Vec<Value> = body
            .split('\n')
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["message"], json!("a"));
        assert_eq!(lines[1]["message"], json!("b"));
    }

    #[tokio::test]
    async fn test_bulk_send_success_with_tag_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/bulk/logglyToken123")
            .match_header("X-LOGGLY-TAG", "tagA,tagB")
            .match_header("content-type", "text/plain")
            .match_body(Matcher::Regex(r#""message":"Message A""#.to_string()))
            .with_status(201)
            .with_body(r#"{"response":"ok"}"#)
            .create_async()
            .await;

        let sink = sink_for(&server, TransportConfig::new("test-app", "logglyToken123"));
        let tags = vec!["tagA".to_string(), "tagB".to_string()];
        let result = sink.bulk_send(&events(&["Message A"]), &tags).await;

        assert!(result.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bulk_send_without_default_tags_omits_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/bulk/logglyToken123")
            .match_header("X-LOGGLY-TAG", Matcher::Missing)
            .with_status(200)
            .create_async()
            .await;

        let sink = sink_for(&server, TransportConfig::new("test-app", "logglyToken123"));
        assert!(sink.bulk_send(&events(&["a"]), &[]).await.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bulk_send_uses_basic_auth() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/bulk/token")
            // base64("user:secret")
            .match_header("authorization", "Basic dXNlcjpzZWNyZXQ=")
            .with_status(200)
            .create_async()
            .await;

        let config = TransportConfig {
            auth: Some(BasicAuth {
                username: "user".to_string(),
                password: "secret".to_string(),
            }),
            ..TransportConfig::new("test-app", "token")
        };
        let sink = sink_for(&server, config);
        assert!(sink.bulk_send(&events(&["a"]), &[]).await.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bulk_send_error_status() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/bulk/logglyToken123")
            .with_status(503)
            .with_body(r#"{"error":"Loggly API failed"}"#)
            .create_async()
            .await;

        let sink = sink_for(&server, TransportConfig::new("test-app", "logglyToken123"));
        let err = sink.bulk_send(&events(&["a"]), &[]).await.unwrap_err();

        assert_eq!(err.status(), Some(503));
        assert_eq!(err.to_string(), "Loggly Error (503): Loggly API failed");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bulk_send_connection_error() {
        // Nothing listens on port 1.
        let config = TransportConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            ..TransportConfig::new("test-app", "token")
        };
        let sink = LogglySink::new(&config).unwrap();
        let err = sink.bulk_send(&events(&["a"]), &[]).await.unwrap_err();

        assert!(matches!(err, SinkError::Request { .. }));
        assert!(err.to_string().starts_with("Loggly Error: "));
    }

    #[test]
    fn test_new_requires_identity() {
        let result = LogglySink::new(&TransportConfig::new("test-app", ""));
        assert!(matches!(result, Err(TransportError::MissingToken)));
    }
}

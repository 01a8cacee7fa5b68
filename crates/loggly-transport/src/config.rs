// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::TransportError;
use serde::{Deserialize, Deserializer};
use std::env;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_ENDPOINT: &str = "https://logs-01.loggly.com";
pub const DEFAULT_BUFFER_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Credentials sent as HTTP basic auth with every bulk request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Configuration for a Loggly transport. Immutable once the transport is built.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Loggly account subdomain
    pub subdomain: String,
    /// Customer token, part of the bulk endpoint path
    pub token: String,
    pub auth: Option<BasicAuth>,
    /// HTTPS proxy URL
    pub proxy: Option<String>,
    /// Base URL of the bulk intake
    pub endpoint: String,
    /// Tags sent in the request header and prepended to per-event tags
    #[serde(alias = "tags")]
    pub default_tags: Vec<String>,
    /// Time window, in milliseconds when deserialized
    #[serde(deserialize_with = "deserialize_millis")]
    pub buffer_interval: Duration,
    /// Count threshold
    pub buffer_size: usize,
    /// Acknowledge every log call without buffering or sending anything
    pub silent: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            subdomain: String::new(),
            token: String::new(),
            auth: None,
            proxy: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            default_tags: Vec::new(),
            buffer_interval: DEFAULT_BUFFER_INTERVAL,
            buffer_size: DEFAULT_BUFFER_SIZE,
            silent: false,
        }
    }
}

impl TransportConfig {
    /// Shorthand for the two required identity fields, everything else defaulted.
    #[must_use]
    pub fn new(subdomain: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            subdomain: subdomain.into(),
            token: token.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, TransportError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`TransportConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TransportError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let auth = match (lookup("LOGGLY_USERNAME"), lookup("LOGGLY_PASSWORD")) {
            (Some(username), Some(password)) => Some(BasicAuth { username, password }),
            (None, None) => None,
            _ => {
                return Err(TransportError::InvalidConfig(
                    "LOGGLY_USERNAME and LOGGLY_PASSWORD must be set together".to_string(),
                ))
            }
        };

        let config = Self {
            subdomain: lookup("LOGGLY_SUBDOMAIN").unwrap_or_default(),
            token: lookup("LOGGLY_TOKEN").unwrap_or_default(),
            auth,
            proxy: lookup("LOGGLY_PROXY").or_else(|| lookup("HTTPS_PROXY")),
            endpoint: lookup("LOGGLY_ENDPOINT").unwrap_or(defaults.endpoint),
            default_tags: lookup("LOGGLY_TAGS")
                .map(|tags| parse_tag_list(&tags))
                .unwrap_or_default(),
            buffer_interval: lookup("LOGGLY_BUFFER_INTERVAL_MS")
                .and_then(|ms| ms.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.buffer_interval),
            buffer_size: lookup("LOGGLY_BUFFER_SIZE")
                .and_then(|size| size.trim().parse::<usize>().ok())
                .unwrap_or(defaults.buffer_size),
            silent: lookup("LOGGLY_SILENT")
                .map(|val| matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the sink identity. Buffering parameters are never rejected, see
    /// [`TransportConfig::sanitized`].
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.subdomain.trim().is_empty() {
            return Err(TransportError::MissingSubdomain);
        }
        if self.token.trim().is_empty() {
            return Err(TransportError::MissingToken);
        }
        if self.endpoint.trim().is_empty() {
            return Err(TransportError::InvalidConfig(
                "Loggly endpoint cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Replaces a zero time window or count threshold with the defaults.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        if self.buffer_interval.is_zero() {
            warn!(
                "LOGGLY | buffer_interval must be positive, using {}ms",
                DEFAULT_BUFFER_INTERVAL.as_millis()
            );
            self.buffer_interval = DEFAULT_BUFFER_INTERVAL;
        }
        if self.buffer_size == 0 {
            warn!("LOGGLY | buffer_size must be positive, using {DEFAULT_BUFFER_SIZE}");
            self.buffer_size = DEFAULT_BUFFER_SIZE;
        }
        self
    }

    /// `POST` target for bulk submissions.
    #[must_use]
    pub fn bulk_url(&self) -> String {
        format!("{}/bulk/{}", self.endpoint.trim_end_matches('/'), self.token)
    }
}

/// Splits a comma separated tag list, dropping blanks.
#[must_use]
pub fn parse_tag_list(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

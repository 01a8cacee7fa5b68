// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client construction for the Loggly sink.
//!
//! The client never imposes a request timeout of its own: the transport leaves
//! timeouts to whoever owns the sink. Connections are pooled and kept alive.

use core::time::Duration;
use std::error::Error;
use tracing::error;

use crate::config::TransportConfig;
use crate::error::TransportError;

/// Builds a client honoring the configured HTTPS proxy.
///
/// An unparsable proxy URL is logged and the client falls back to a direct
/// connection rather than failing the transport.
pub fn get_client(config: &TransportConfig) -> Result<reqwest::Client, TransportError> {
    match build_client(config.proxy.as_deref()) {
        Ok(client) => Ok(client),
        Err(e) => {
            error!(
                "LOGGLY | Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            build_client(None).map_err(|inner| TransportError::HttpClient(inner.to_string()))
        }
    }
}

fn build_client(proxy: Option<&str>) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .use_rustls_tls()
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if let Some(proxy) = proxy {
        client = client.proxy(reqwest::Proxy::https(proxy)?).http1_only();
    }

    Ok(client.build()?)
}

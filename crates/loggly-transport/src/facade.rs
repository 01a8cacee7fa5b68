// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Glue between `tracing` and the transport.
//!
//! [`LogglyLayer`] forwards every `tracing` event to [`LogglyTransport::log`]:
//!
//! ```text
//! info!(user = "bob", "Message A")
//!   -> log("info", "Message A", {"user": "bob", "target": "my_app"}, None)
//! ```
//!
//! Events emitted by this crate and by its HTTP stack are skipped, otherwise every
//! flush would log about itself and feed the next batch.
//!
//! [`try_init`] is the only place that touches global state: it installs the process
//! wide subscriber once and refuses a second registration.

use serde_json::{Map, Value};
use std::fmt;
use tracing::field::{Field, Visit};
use tracing_core::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::FacadeError;
use crate::event::MESSAGE_FIELD;
use crate::transport::LogglyTransport;

const TARGET_FIELD: &str = "target";

/// Targets never forwarded to the transport.
const INTERNAL_TARGETS: &[&str] = &[
    "loggly_transport",
    "reqwest",
    "hyper",
    "hyper_util",
    "h2",
    "rustls",
    "tokio",
    "mio",
    "want",
];

pub struct LogglyLayer {
    transport: LogglyTransport,
}

impl LogglyLayer {
    #[must_use]
    pub fn new(transport: LogglyTransport) -> Self {
        LogglyLayer { transport }
    }
}

impl<S> Layer<S> for LogglyLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_internal(metadata.target()) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut meta = visitor.fields;
        meta.insert(
            TARGET_FIELD.to_string(),
            Value::from(metadata.target().to_string()),
        );
        self.transport.log(
            &level_name(metadata.level()),
            &visitor.message.unwrap_or_default(),
            Some(meta),
            None,
        );
    }
}

/// Installs a global subscriber printing to stdout and shipping to Loggly.
///
/// `filter` uses the `EnvFilter` syntax, e.g. `"info"` or `"h2=off,my_app=debug"`.
pub fn try_init(transport: LogglyTransport, filter: &str) -> Result<(), FacadeError> {
    let env_filter = EnvFilter::try_new(filter).map_err(|e| FacadeError::InvalidFilter {
        filter: filter.to_string(),
        reason: e.to_string(),
    })?;

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_thread_names(false)
                .with_thread_ids(false)
                .with_line_number(false)
                .with_file(false)
                .with_target(true)
                .without_time(),
        )
        .with(LogglyLayer::new(transport));

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| FacadeError::AlreadyRegistered(e.to_string()))
}

fn is_internal(target: &str) -> bool {
    INTERNAL_TARGETS.iter().any(|internal| {
        target
            .strip_prefix(internal)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

fn level_name(level: &Level) -> String {
    level.as_str().to_lowercase()
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == MESSAGE_FIELD {
            self.message = Some(match value {
                Value::String(message) => message,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::from(format!("{value:?}")));
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log event records as they are shipped to the sink.
//!
//! A [`LogEvent`] is created once per `log` call and never mutated afterwards. The record is
//! the caller's metadata shallow-merged over the base `level`, `message` and `timestamp`
//! fields. `tags` are handled apart from the other metadata: when the caller supplies any,
//! the event carries the configured default tags followed by the caller's tags.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

pub const LEVEL_FIELD: &str = "level";
pub const MESSAGE_FIELD: &str = "message";
pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const TAGS_FIELD: &str = "tags";

/// Caller supplied structured fields.
pub type Meta = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    record: Map<String, Value>,
    tags: Option<Vec<String>>,
}

impl LogEvent {
    /// Builds an event stamped with the current time.
    #[must_use]
    pub fn new(level: &str, message: &str, meta: Option<Meta>, default_tags: &[String]) -> Self {
        Self::new_at(Utc::now(), level, message, meta, default_tags)
    }

    /// Builds an event stamped with `at`.
    #[must_use]
    pub fn new_at(
        at: DateTime<Utc>,
        level: &str,
        message: &str,
        meta: Option<Meta>,
        default_tags: &[String],
    ) -> Self {
        let mut record = Map::new();
        record.insert(LEVEL_FIELD.to_string(), Value::from(level));
        record.insert(MESSAGE_FIELD.to_string(), Value::from(message));
        record.insert(TIMESTAMP_FIELD.to_string(), Value::from(format_timestamp(at)));

        let mut tags = None;
        for (key, value) in meta.unwrap_or_default() {
            if key == TAGS_FIELD {
                // `"tags": null` means no event tags
                if !value.is_null() {
                    tags = Some(merge_tags(default_tags, tag_list(value)));
                }
            } else {
                record.insert(key, value);
            }
        }

        LogEvent { record, tags }
    }

    #[must_use]
    pub fn level(&self) -> &str {
        self.str_field(LEVEL_FIELD)
    }

    #[must_use]
    pub fn message(&self) -> &str {
        self.str_field(MESSAGE_FIELD)
    }

    #[must_use]
    pub fn timestamp(&self) -> &str {
        self.str_field(TIMESTAMP_FIELD)
    }

    /// Effective tags, `None` when the caller supplied no tags at log time.
    #[must_use]
    pub fn tags(&self) -> Option<&[String]> {
        self.tags.as_deref()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.record.get(field)
    }

    // Metadata may override the base fields with non-string values.
    fn str_field(&self, field: &str) -> &str {
        self.record
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

impl Serialize for LogEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.record.len() + usize::from(self.tags.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for (key, value) in &self.record {
            map.serialize_entry(key, value)?;
        }
        if let Some(tags) = &self.tags {
            map.serialize_entry(TAGS_FIELD, tags)?;
        }
        map.end()
    }
}

/// Formats `at` the way JavaScript's `Date#toISOString` does: `1970-01-01T00:00:00.100Z`.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Default tags first, event tags appended. Duplicates are kept.
#[must_use]
pub fn merge_tags(default_tags: &[String], event_tags: Vec<String>) -> Vec<String> {
    let mut merged = Vec::with_capacity(default_tags.len() + event_tags.len());
    merged.extend_from_slice(default_tags);
    merged.extend(event_tags);
    merged
}

fn tag_list(value: Value) -> Vec<String> {
    match value {
        Value::Array(values) => values.into_iter().filter_map(tag_text).collect(),
        other => tag_text(other).into_iter().collect(),
    }
}

fn tag_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(tag) => Some(tag),
        other => Some(other.to_string()),
    }
}

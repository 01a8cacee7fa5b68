// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory buffer of pending log entries.
//!
//! The [`Accumulator`] only buffers: it knows nothing about timers or sinks. The
//! [`AccumulatorService`](crate::accumulator_service::AccumulatorService) drives it and
//! decides when a [`Batch`] is taken out and handed to the dispatcher.

use std::fmt;
use std::sync::Arc;

use crate::error::SinkError;
use crate::event::LogEvent;

const INITIAL_CAPACITY: usize = 128;

/// Outcome delivered to every completion callback.
///
/// All entries of a batch receive the same outcome; on failure they share one error.
pub type DeliveryResult = Result<(), Arc<SinkError>>;

/// Completion callback invoked exactly once per logged event.
pub type LogCallback = Box<dyn FnOnce(DeliveryResult) + Send + 'static>;

/// A log event waiting for delivery, paired with its completion callback.
pub struct PendingEntry {
    pub event: LogEvent,
    pub callback: LogCallback,
}

impl PendingEntry {
    #[must_use]
    pub fn new(event: LogEvent, callback: Option<LogCallback>) -> Self {
        PendingEntry {
            event,
            callback: callback.unwrap_or_else(|| Box::new(|_: DeliveryResult| {})),
        }
    }

    /// Consumes the entry, invoking its callback with `result`.
    pub fn complete(self, result: DeliveryResult) {
        (self.callback)(result);
    }
}

impl fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEntry")
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

/// One flush worth of entries, in submission order. Never empty.
#[derive(Debug)]
pub struct Batch(Vec<PendingEntry>);

impl Batch {
    /// Returns `None` for an empty sequence.
    #[must_use]
    pub fn new(entries: Vec<PendingEntry>) -> Option<Self> {
        if entries.is_empty() {
            None
        } else {
            Some(Batch(entries))
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn events(&self) -> Vec<&LogEvent> {
        self.0.iter().map(|entry| &entry.event).collect()
    }

    /// Splits the batch into its events and their callbacks, both in submission order.
    #[must_use]
    pub fn into_parts(self) -> (Vec<LogEvent>, Vec<LogCallback>) {
        self.0
            .into_iter()
            .map(|entry| (entry.event, entry.callback))
            .unzip()
    }
}

impl IntoIterator for Batch {
    type Item = PendingEntry;
    type IntoIter = std::vec::IntoIter<PendingEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// What a [`Accumulator::push`] did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// First entry since the last flush: the time window starts now.
    Armed,
    /// Entry buffered, nothing else to do.
    Buffered,
    /// The count threshold has been reached.
    Full,
}

#[derive(Debug)]
pub struct Accumulator {
    buffer: Vec<PendingEntry>,
    max_entries: usize,
}

impl Accumulator {
    /// `max_entries` below 1 is raised to 1.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Accumulator {
            buffer: Vec::with_capacity(max_entries.min(INITIAL_CAPACITY)),
            max_entries,
        }
    }

    pub fn push(&mut self, entry: PendingEntry) -> PushOutcome {
        self.buffer.push(entry);
        if self.buffer.len() >= self.max_entries {
            PushOutcome::Full
        } else if self.buffer.len() == 1 {
            PushOutcome::Armed
        } else {
            PushOutcome::Buffered
        }
    }

    /// Swaps the buffer for an empty one and returns what was in it.
    pub fn take_batch(&mut self) -> Option<Batch> {
        if self.buffer.is_empty() {
            return None;
        }
        let capacity = self.max_entries.min(INITIAL_CAPACITY);
        Batch::new(std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(capacity),
        ))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}

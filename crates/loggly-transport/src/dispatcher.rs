// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sends flushed batches to the sink and reports the outcome.
//!
//! Each batch is delivered by its own task, so a slow request never holds back
//! accumulation or later batches:
//!
//! ```text
//!   AccumulatorService
//!          │ Batch
//!          v
//!   ┌─────────────┐     spawn      ┌──────────────────────┐
//!   │ Dispatcher  │ ─────────────> │ deliver(batch)       │
//!   └─────────────┘   (per batch)  │  1. sink.bulk_send   │
//!                                  │  2. every callback   │
//!                                  │  3. Logged / Error   │
//!                                  └──────────────────────┘
//! ```
//!
//! Batches share nothing mutable: the sink is behind an `Arc` and the only shared
//! channel is the broadcast sender for [`TransportEvent`]s. No retry is attempted and
//! no timeout is imposed here.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::accumulator::{Batch, DeliveryResult};
use crate::error::SinkError;
use crate::sink::LogSink;

/// Capacity of the notification channel. Slow subscribers miss the oldest notifications.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Batch level notification for observers.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A batch of `count` events was accepted by the sink.
    Logged { count: usize },
    /// A batch failed; every entry of the batch received the same error.
    Error(Arc<SinkError>),
}

impl TransportEvent {
    /// `"logged"` or `"error"`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::Logged { .. } => "logged",
            TransportEvent::Error(_) => "error",
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    sink: Arc<dyn LogSink>,
    default_tags: Arc<[String]>,
    events_tx: broadcast::Sender<TransportEvent>,
    tracker: TaskTracker,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        sink: Arc<dyn LogSink>,
        default_tags: Vec<String>,
        events_tx: broadcast::Sender<TransportEvent>,
    ) -> Self {
        Dispatcher {
            sink,
            default_tags: default_tags.into(),
            events_tx,
            tracker: TaskTracker::new(),
        }
    }

    /// Starts delivering `batch` in the background. Must be called within a Tokio runtime.
    pub fn dispatch(&self, batch: Batch) -> JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        let default_tags = Arc::clone(&self.default_tags);
        let events_tx = self.events_tx.clone();
        self.tracker
            .spawn(async move { deliver(sink.as_ref(), &default_tags, &events_tx, batch).await })
    }

    /// Number of batches whose delivery has not completed yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every dispatched batch has been delivered. Batches dispatched
    /// afterwards are still delivered but no longer awaited by later calls.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events_tx.subscribe()
    }
}

/// Sends one batch, then resolves its callbacks in submission order and notifies observers.
pub async fn deliver(
    sink: &dyn LogSink,
    default_tags: &[String],
    events_tx: &broadcast::Sender<TransportEvent>,
    batch: Batch,
) {
    let count = batch.len();
    let (events, callbacks) = batch.into_parts();

    debug!("LOGGLY | Flushing {count} events to {}", sink.name());
    let result: DeliveryResult = sink.bulk_send(&events, default_tags).await.map_err(Arc::new);

    for callback in callbacks {
        callback(result.clone());
    }

    let notification = match result {
        Ok(()) => {
            debug!("LOGGLY | Successfully flushed {count} events");
            TransportEvent::Logged { count }
        }
        Err(err) => {
            error!("LOGGLY | Failed to flush {count} events: {err}");
            TransportEvent::Error(err)
        }
    };
    // No subscribers is fine
    let _ = events_tx.send(notification);
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The transport: single entry point called by the logging facade.
//!
//! ```rust,ignore
//! use loggly_transport::{LogglyTransport, TransportConfig};
//!
//! let transport = LogglyTransport::new(TransportConfig {
//!     default_tags: vec!["tagA".into(), "tagB".into()],
//!     ..TransportConfig::new("test-app", "logglyToken123")
//! })?;
//!
//! let mut events = transport.subscribe();
//! transport.log("info", "Message A", None, Some(Box::new(|result| {
//!     if let Err(err) = result {
//!         eprintln!("{err}");
//!     }
//! })));
//!
//! transport.close().await;
//! ```

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::accumulator::{DeliveryResult, LogCallback, PendingEntry};
use crate::accumulator_service::{AccumulatorCommand, AccumulatorHandle, AccumulatorService};
use crate::config::TransportConfig;
use crate::dispatcher::{Dispatcher, TransportEvent, EVENT_CHANNEL_CAPACITY};
use crate::error::{SinkError, TransportError};
use crate::event::{LogEvent, Meta};
use crate::sink::{LogSink, LogglySink};

/// Name under which the transport registers with a logging facade.
pub const TRANSPORT_NAME: &str = "loggly";

#[derive(Clone)]
pub struct LogglyTransport {
    default_tags: Arc<[String]>,
    silent: bool,
    handle: AccumulatorHandle,
    dispatcher: Dispatcher,
}

impl LogglyTransport {
    /// Builds a transport shipping to the Loggly bulk API.
    ///
    /// Must be called within a Tokio runtime: the accumulator runs as a spawned task.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let sink = LogglySink::new(&config)?;
        Self::with_sink(config, Arc::new(sink))
    }

    /// Builds a transport shipping to `sink`.
    pub fn with_sink(
        config: TransportConfig,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let config = config.sanitized();

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let dispatcher = Dispatcher::new(sink, config.default_tags.clone(), events_tx);
        let (service, handle) = AccumulatorService::new(
            config.buffer_size,
            config.buffer_interval,
            dispatcher.clone(),
        );
        tokio::spawn(service.run());

        debug!(
            "LOGGLY | Transport started: buffer_size={} buffer_interval={}ms silent={}",
            config.buffer_size,
            config.buffer_interval.as_millis(),
            config.silent
        );

        Ok(LogglyTransport {
            default_tags: config.default_tags.into(),
            silent: config.silent,
            handle,
            dispatcher,
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        TRANSPORT_NAME
    }

    /// Buffers one event. Returns immediately; `callback` is invoked exactly once,
    /// after the event's batch has been sent (or has failed).
    pub fn log(
        &self,
        level: &str,
        message: &str,
        meta: Option<Meta>,
        callback: Option<LogCallback>,
    ) {
        if self.silent {
            if let Some(callback) = callback {
                callback(Ok(()));
            }
            return;
        }

        let event = LogEvent::new(level, message, meta, &self.default_tags);
        if let Err(mpsc::error::SendError(AccumulatorCommand::Submit(entry))) =
            self.handle.submit(PendingEntry::new(event, callback))
        {
            warn!("LOGGLY | Transport closed, dropping log entry");
            entry.complete(Err(Arc::new(SinkError::Closed)));
        }
    }

    /// Like [`LogglyTransport::log`], handing the outcome back through a channel.
    pub fn log_with_receipt(
        &self,
        level: &str,
        message: &str,
        meta: Option<Meta>,
    ) -> oneshot::Receiver<DeliveryResult> {
        let (tx, rx) = oneshot::channel();
        self.log(
            level,
            message,
            meta,
            Some(Box::new(move |result: DeliveryResult| {
                let _ = tx.send(result);
            })),
        );
        rx
    }

    /// Batch level `"logged"` / `"error"` notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.dispatcher.subscribe()
    }

    /// Sends whatever is buffered now and waits for that batch to complete.
    pub async fn flush(&self) {
        match self.handle.flush().await {
            Ok(Some(delivery)) => {
                if let Err(e) = delivery.await {
                    warn!("LOGGLY | Failed to join flush task: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => debug!("LOGGLY | Flush skipped: {e}"),
        }
    }

    /// Flushes the buffer, stops accumulating and waits for every in-flight batch.
    /// Later `log` calls fail their callback with [`SinkError::Closed`].
    pub async fn close(&self) {
        if let Err(e) = self.handle.shutdown().await {
            debug!("LOGGLY | Accumulator already stopped: {e}");
        }
        self.dispatcher.wait_idle().await;
    }

    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    #[must_use]
    pub fn default_tags(&self) -> &[String] {
        &self.default_tags
    }
}

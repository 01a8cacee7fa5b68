// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Single-task event loop that owns the [`Accumulator`] and its flush timer.
//!
//! All buffer mutation happens on the service task, so no lock guards the buffer:
//!
//! ```text
//!    ┌──────────────┐
//!    │   Handles    │ (LogglyTransport, clones)
//!    └──────┬───────┘
//!           │ Submit / Flush / Shutdown
//!           v
//!    ┌──────────────┐   deadline   ┌──────────────┐
//!    │   Service    │ <─────────── │  sleep_until │
//!    └──────┬───────┘              └──────────────┘
//!           │ Batch
//!           v
//!    ┌──────────────┐
//!    │  Dispatcher  │ (one task per batch)
//!    └──────────────┘
//! ```
//!
//! States:
//! - IDLE: empty buffer, no deadline
//! - ACCUMULATING: entries buffered, deadline = first entry + window
//!
//! A batch leaves the buffer when the count threshold is reached (the deadline is
//! dropped with it), or when the deadline passes. When both are due, the count
//! threshold wins: queued commands are processed before the timer.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error};

use crate::accumulator::{Accumulator, PendingEntry, PushOutcome};
use crate::dispatcher::Dispatcher;

#[derive(Debug)]
pub enum AccumulatorCommand {
    /// Buffer one entry. Never blocks the sender.
    Submit(PendingEntry),

    /// Dispatch whatever is buffered. Answers with the delivery task of the batch, if
    /// there was anything to send.
    Flush(oneshot::Sender<Option<JoinHandle<()>>>),

    /// Dispatch whatever is buffered and stop.
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone, Debug)]
pub struct AccumulatorHandle {
    tx: mpsc::UnboundedSender<AccumulatorCommand>,
}

impl AccumulatorHandle {
    pub fn submit(
        &self,
        entry: PendingEntry,
    ) -> Result<(), mpsc::error::SendError<AccumulatorCommand>> {
        self.tx.send(AccumulatorCommand::Submit(entry))
    }

    pub async fn flush(&self) -> Result<Option<JoinHandle<()>>, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(AccumulatorCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {e}"))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {e}"))
    }

    pub async fn shutdown(&self) -> Result<(), String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(AccumulatorCommand::Shutdown(response_tx))
            .map_err(|e| format!("Failed to send shutdown command: {e}"))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive shutdown response: {e}"))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct AccumulatorService {
    accumulator: Accumulator,
    window: Duration,
    deadline: Option<Instant>,
    dispatcher: Dispatcher,
    rx: mpsc::UnboundedReceiver<AccumulatorCommand>,
}

impl AccumulatorService {
    /// Returns the service (to be spawned) and a handle (to send commands).
    #[must_use]
    pub fn new(
        max_entries: usize,
        window: Duration,
        dispatcher: Dispatcher,
    ) -> (Self, AccumulatorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            accumulator: Accumulator::new(max_entries),
            window,
            deadline: None,
            dispatcher,
            rx,
        };
        (service, AccumulatorHandle { tx })
    }

    /// Processes commands until shutdown or until every handle is dropped. Anything
    /// still buffered at that point is dispatched before returning.
    pub async fn run(mut self) {
        debug!("LOGGLY | Accumulator service started");

        loop {
            let command = match self.deadline {
                Some(deadline) => tokio::select! {
                    biased;
                    command = self.rx.recv() => command,
                    () = sleep_until(deadline) => {
                        self.on_window_elapsed();
                        continue;
                    }
                },
                None => self.rx.recv().await,
            };

            let Some(command) = command else {
                debug!("LOGGLY | All accumulator handles dropped");
                self.stop(Vec::new());
                break;
            };

            match command {
                AccumulatorCommand::Submit(entry) => self.submit(entry),
                AccumulatorCommand::Flush(response_tx) => self.answer_flush(response_tx),
                AccumulatorCommand::Shutdown(response_tx) => {
                    debug!("LOGGLY | Accumulator service shutting down");
                    self.stop(vec![response_tx]);
                    break;
                }
            }
        }

        debug!("LOGGLY | Accumulator service stopped");
    }

    /// Refuses new commands, then processes the ones already queued so every accepted
    /// entry is dispatched before the final flush.
    fn stop(&mut self, mut acks: Vec<oneshot::Sender<()>>) {
        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            match command {
                AccumulatorCommand::Submit(entry) => {
                    if self.accumulator.push(entry) == PushOutcome::Full {
                        self.flush();
                    }
                }
                AccumulatorCommand::Flush(response_tx) => self.answer_flush(response_tx),
                AccumulatorCommand::Shutdown(response_tx) => acks.push(response_tx),
            }
        }
        self.flush();
        for ack in acks {
            let _ = ack.send(());
        }
    }

    fn answer_flush(&mut self, response_tx: oneshot::Sender<Option<JoinHandle<()>>>) {
        let delivery = self.flush();
        if response_tx.send(delivery).is_err() {
            error!("LOGGLY | Failed to send flush response - receiver dropped");
        }
    }

    fn submit(&mut self, entry: PendingEntry) {
        match self.accumulator.push(entry) {
            PushOutcome::Full => {
                self.flush();
            }
            PushOutcome::Armed => {
                self.deadline = Some(Instant::now() + self.window);
            }
            PushOutcome::Buffered => {
                // A steady stream of submits must not starve the timer
                if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
                    self.flush();
                }
            }
        }
    }

    fn on_window_elapsed(&mut self) {
        debug!(
            "LOGGLY | Buffer window elapsed with {} entries",
            self.accumulator.len()
        );
        self.flush();
    }

    /// Hands the buffered entries to the dispatcher and returns to IDLE.
    fn flush(&mut self) -> Option<JoinHandle<()>> {
        self.deadline = None;
        self.accumulator
            .take_batch()
            .map(|batch| self.dispatcher.dispatch(batch))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::accumulator::DeliveryResult;
    use crate::dispatcher::tests::RecordingSink;
    use crate::dispatcher::{TransportEvent, EVENT_CHANNEL_CAPACITY};
    use crate::event::LogEvent;
    use std::sync::Arc;
    use tokio::sync::broadcast;

    const WINDOW: Duration = Duration::from_millis(100);

    struct Harness {
        handle: AccumulatorHandle,
        sink: Arc<RecordingSink>,
        events: broadcast::Receiver<TransportEvent>,
        results: mpsc::UnboundedReceiver<(String, DeliveryResult)>,
        results_tx: mpsc::UnboundedSender<(String, DeliveryResult)>,
        task: JoinHandle<()>,
    }

    impl Harness {
        fn start(max_entries: usize) -> Self {
            let sink = Arc::new(RecordingSink::default());
            let (events_tx, events) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
            let dispatcher = Dispatcher::new(sink.clone(), Vec::new(), events_tx);
            let (service, handle) = AccumulatorService::new(max_entries, WINDOW, dispatcher);
            let task = tokio::spawn(service.run());
            let (results_tx, results) = mpsc::unbounded_channel();
            Harness {
                handle,
                sink,
                events,
                results,
                results_tx,
                task,
            }
        }

        fn submit(&self, message: &str) {
            let tx = self.results_tx.clone();
            let name = message.to_string();
            self.handle
                .submit(PendingEntry::new(
                    LogEvent::new("info", message, None, &[]),
                    Some(Box::new(move |result: DeliveryResult| {
                        let _ = tx.send((name, result));
                    })),
                ))
                .unwrap();
        }

        fn requests(&self) -> Vec<Vec<String>> {
            self.sink
                .requests
                .lock()
                .unwrap()
                .iter()
                .map(|(events, _)| events.iter().map(|e| e.message().to_string()).collect())
                .collect()
        }
    }

    /// Lets the service and dispatcher tasks run without moving the clock.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_threshold_flushes_without_waiting() {
        let mut harness = Harness::start(3);
        let started = Instant::now();

        for message in ["a", "b", "c"] {
            harness.submit(message);
        }

        assert!(matches!(
            harness.events.recv().await.unwrap(),
            TransportEvent::Logged { count: 3 }
        ));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(harness.requests(), vec![vec!["a", "b", "c"]]);
        for expected in ["a", "b", "c"] {
            let (name, result) = harness.results.recv().await.unwrap();
            assert_eq!(name, expected);
            assert!(result.is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_flushes_partial_buffer_in_order() {
        let mut harness = Harness::start(100);
        let started = Instant::now();

        harness.submit("a");
        settle().await;
        tokio::time::advance(Duration::from_millis(10)).await;
        harness.submit("b");
        settle().await;
        tokio::time::advance(Duration::from_millis(10)).await;
        harness.submit("c");
        settle().await;
        assert!(harness.requests().is_empty());

        assert!(matches!(
            harness.events.recv().await.unwrap(),
            TransportEvent::Logged { count: 3 }
        ));
        // The window starts at the first entry, not the last one.
        assert_eq!(started.elapsed(), WINDOW);
        assert_eq!(harness.requests(), vec![vec!["a", "b", "c"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_flush_below_both_thresholds() {
        let harness = Harness::start(10);

        harness.submit("a");
        harness.submit("b");
        settle().await;
        tokio::time::advance(WINDOW - Duration::from_millis(1)).await;
        settle().await;

        assert!(harness.requests().is_empty());
        assert_eq!(harness.sink.requests.lock().unwrap().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_window_is_a_noop() {
        let mut harness = Harness::start(1);

        harness.submit("a");
        assert!(matches!(
            harness.events.recv().await.unwrap(),
            TransportEvent::Logged { count: 1 }
        ));

        // The count flush dropped the deadline, nothing fires later.
        tokio::time::advance(WINDOW * 5).await;
        settle().await;
        assert_eq!(harness.requests().len(), 1);
        assert!(harness.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_after_a_flush_start_a_new_batch() {
        let mut harness = Harness::start(2);

        harness.submit("a");
        harness.submit("b");
        harness.submit("c");
        harness.events.recv().await.unwrap();
        let started = Instant::now();

        harness.events.recv().await.unwrap();
        assert_eq!(started.elapsed(), WINDOW);
        assert_eq!(harness.requests(), vec![vec!["a", "b"], vec!["c"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_command_dispatches_buffer() {
        let harness = Harness::start(100);
        harness.submit("a");

        let delivery = harness.handle.flush().await.unwrap();
        delivery.unwrap().await.unwrap();
        assert_eq!(harness.requests(), vec![vec!["a"]]);

        // Nothing left to flush.
        assert!(harness.handle.flush().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_and_stops() {
        let mut harness = Harness::start(100);
        harness.submit("a");

        harness.handle.shutdown().await.unwrap();
        harness.task.await.unwrap();
        let (name, result) = harness.results.recv().await.unwrap();
        assert_eq!(name, "a");
        assert!(result.is_ok());
        assert!(harness.handle.is_closed());
        assert!(harness.handle.flush().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_queued_behind_shutdown_are_delivered() {
        let mut harness = Harness::start(100);
        harness.submit("before");
        let (ack_tx, ack_rx) = oneshot::channel();
        harness
            .handle
            .tx
            .send(AccumulatorCommand::Shutdown(ack_tx))
            .unwrap();
        harness.submit("late");

        ack_rx.await.unwrap();
        (&mut harness.task).await.unwrap();

        for expected in ["before", "late"] {
            let (name, result) = harness.results.recv().await.unwrap();
            assert_eq!(name, expected);
            assert!(result.is_ok());
        }
        assert_eq!(harness.requests(), vec![vec!["before", "late"]]);

        // Once stopped, submissions are refused and handed back to the caller.
        let refused = harness.handle.submit(PendingEntry::new(
            LogEvent::new("info", "too late", None, &[]),
            None,
        ));
        assert!(refused.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_every_handle_flushes_remaining_entries() {
        let Harness {
            handle,
            sink,
            task,
            results_tx,
            mut results,
            ..
        } = Harness::start(100);
        handle
            .submit(PendingEntry::new(
                LogEvent::new("info", "last words", None, &[]),
                Some(Box::new(move |result: DeliveryResult| {
                    let _ = results_tx.send(("last words".to_string(), result));
                })),
            ))
            .unwrap();
        drop(handle);

        task.await.unwrap();
        let (name, result) = results.recv().await.unwrap();
        assert_eq!(name, "last words");
        assert!(result.is_ok());
        assert_eq!(sink.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_does_not_wedge_the_service() {
        let mut harness = Harness::start(1);
        *harness.sink.fail_with.lock().unwrap() = Some(503);

        harness.submit("this one will fail");
        match harness.events.recv().await.unwrap() {
            TransportEvent::Error(err) => assert_eq!(err.status(), Some(503)),
            other => panic!("unexpected event {other:?}"),
        }
        let (_, result) = harness.results.recv().await.unwrap();
        assert!(result.is_err());

        *harness.sink.fail_with.lock().unwrap() = None;
        harness.submit("this one will work");
        assert!(matches!(
            harness.events.recv().await.unwrap(),
            TransportEvent::Logged { count: 1 }
        ));
        let (name, result) = harness.results.recv().await.unwrap();
        assert_eq!(name, "this one will work");
        assert!(result.is_ok());
    }
}

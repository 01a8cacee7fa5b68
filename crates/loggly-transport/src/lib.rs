// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffered log shipping to the Loggly bulk HTTP API.
//!
//! ```text
//!   log(level, message, meta, callback)
//!                  │
//!                  v
//!        ┌───────────────────┐
//!        │ AccumulatorService│  (count threshold or time window,
//!        └─────────┬─────────┘   whichever comes first)
//!                  │ Batch
//!                  v
//!        ┌───────────────────┐
//!        │    Dispatcher     │  (one task per batch)
//!        └─────────┬─────────┘
//!                  │ bulk_send
//!                  v
//!        ┌───────────────────┐
//!        │    LogglySink     │  POST /bulk/{token}
//!        └───────────────────┘
//! ```
//!
//! Every logged event gets exactly one callback with its batch's outcome, and every
//! batch produces one [`TransportEvent`] for subscribers.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod accumulator;
pub mod accumulator_service;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod facade;
pub mod http;
pub mod sink;
pub mod transport;

pub use accumulator::{DeliveryResult, LogCallback};
pub use config::TransportConfig;
pub use dispatcher::TransportEvent;
pub use error::{FacadeError, SinkError, TransportError};
pub use event::{LogEvent, Meta};
pub use sink::{LogSink, LogglySink};
pub use transport::LogglyTransport;

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous batching and delivery of analytics records.
//!
//! Producers hand finished records to a [`Pipeline`]; background workers
//! drain its bounded buffer in batches and post them to a [`Destination`],
//! retrying with backoff and reporting what could not be delivered.
//!
//! - [`buffer`]: bounded FIFO with non-blocking enqueue and cancellable drain
//! - [`batcher`]: batch formation by record count and encoded size
//! - [`retry`]: backoff strategies and the bounded retry loop
//! - [`destination`] and [`http`]: request building and sending
//! - [`uploader`]: per-route partitioning, delivery and failure reporting
//! - [`worker`] and [`pipeline`]: the worker pool and its lifecycle

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batcher;
pub mod buffer;
pub mod config;
pub mod destination;
pub mod error;
pub mod http;
pub mod logger;
pub mod pipeline;
pub mod record;
pub mod retry;
pub mod uploader;
pub mod worker;

pub use config::PipelineConfig;
pub use destination::{BenignRejection, Destination, Route};
pub use error::{ApiError, DeliveryError, PipelineError};
pub use http::{HttpResponse, HttpSender, PreparedRequest, ReqwestSender};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use record::{Record, RecordKind};
pub use retry::{Backoff, ExponentialBackoff, ImmediateRetry, LinearBackoff, RetryPolicy};
pub use uploader::ErrorCallback;
pub use worker::WorkerState;

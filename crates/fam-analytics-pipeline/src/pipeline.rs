// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The facade application code talks to.
//!
//! ```text
//!   enqueue ──> RecordBuffer ──> Worker 0..N (Batcher -> Uploader) ──> HttpSender
//!                                       │
//!                                       └── failures ──> ErrorCallback
//! ```
//!
//! `enqueue` never waits. `flush`, `join` and `shutdown` are async and only
//! ever wait on the workers, never on producers.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use futures::future::join_all;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batcher::Batcher;
use crate::buffer::RecordBuffer;
use crate::config::PipelineConfig;
use crate::destination::Destination;
use crate::error::{DeliveryError, PipelineError};
use crate::http::{HttpSender, ReqwestSender};
use crate::record::Record;
use crate::retry::{Backoff, LinearBackoff, RetryPolicy};
use crate::uploader::{ErrorCallback, Uploader};
use crate::worker::{Worker, WorkerState};

pub struct PipelineBuilder {
    config: PipelineConfig,
    destination: Arc<dyn Destination>,
    sender: Option<Arc<dyn HttpSender>>,
    backoff: Option<Arc<dyn Backoff>>,
    on_error: Option<ErrorCallback>,
}

impl PipelineBuilder {
    /// Replaces the default reqwest sender.
    #[must_use]
    pub fn sender(mut self, sender: Arc<dyn HttpSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Replaces the default linear backoff built from `retry_base_delay`.
    #[must_use]
    pub fn backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    #[must_use]
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&DeliveryError, &[Record]) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    /// Builds the pipeline, spawning its workers when `start_workers` is set.
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            PipelineError::Runtime(format!("a tokio runtime is required: {e}"))
        })?;

        let sender = self
            .sender
            .unwrap_or_else(|| Arc::new(ReqwestSender::new(&self.config)));
        let backoff = self.backoff.unwrap_or_else(|| {
            Arc::new(LinearBackoff {
                base: self.config.retry_base_delay,
            })
        });
        let retry = RetryPolicy::new(self.config.max_attempts, backoff);

        let buffer = Arc::new(RecordBuffer::new(self.config.max_queue_size));
        let batcher = Batcher::new(
            Arc::clone(&buffer),
            self.config.upload_size,
            self.config.max_batch_bytes,
        );
        let uploader = Uploader::new(self.destination, sender, retry, self.on_error);

        let pipeline = Pipeline {
            config: self.config,
            buffer,
            batcher,
            uploader,
            runtime,
            cancel: CancellationToken::new(),
            workers: OnceLock::new(),
            shutdown: OnceCell::new(),
        };
        if pipeline.config.start_workers {
            pipeline.start();
        }
        Ok(pipeline)
    }
}

/// Owns the buffer and the worker pool of one destination.
pub struct Pipeline {
    config: PipelineConfig,
    buffer: Arc<RecordBuffer>,
    batcher: Batcher,
    uploader: Uploader,
    runtime: Handle,
    cancel: CancellationToken,
    workers: OnceLock<Vec<Worker>>,
    shutdown: OnceCell<()>,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig, destination: Arc<dyn Destination>) -> PipelineBuilder {
        PipelineBuilder {
            config,
            destination,
            sender: None,
            backoff: None,
            on_error: None,
        }
    }

    /// Offers `record` to the buffer without waiting. The flag is `false`
    /// when the buffer is full or the pipeline is shut down; the record is
    /// handed back either way.
    pub fn enqueue(&self, record: Record) -> (bool, Record) {
        let accepted = self.buffer.enqueue(record.clone());
        if !accepted {
            debug!(
                "Rejected {} record: buffer {} ({}/{})",
                record.kind(),
                if self.buffer.is_closed() {
                    "closed"
                } else {
                    "full"
                },
                self.buffer.len(),
                self.buffer.capacity()
            );
        }
        (accepted, record)
    }

    /// Spawns the worker pool unless it already exists.
    pub fn start(&self) {
        self.workers.get_or_init(|| {
            let _runtime = self.runtime.enter();
            debug!("Starting {} workers", self.config.workers);
            (0..self.config.workers)
                .map(|id| {
                    Worker::spawn(
                        id,
                        self.batcher.clone(),
                        self.uploader.clone(),
                        Arc::clone(&self.buffer),
                        &self.cancel,
                    )
                })
                .collect()
        });
    }

    /// Waits until every accepted record has been delivered or reported.
    ///
    /// Returns early, with a warning, when no worker is left to do the work.
    pub async fn flush(&self) {
        let pending = self.buffer.unfinished();
        if pending == 0 {
            return;
        }
        if !self.is_running() {
            warn!("Flush requested with {pending} pending records but no worker is running");
            return;
        }
        debug!("Flushing {pending} pending records");

        let workers_stopped = join_all(self.workers().iter().map(Worker::stopped));
        tokio::select! {
            () = self.buffer.wait_settled() => {}
            _ = workers_stopped => {
                let pending = self.buffer.unfinished();
                if pending > 0 {
                    warn!("Workers stopped during flush with {pending} records pending");
                }
            }
        }
    }

    /// Stops every worker after its in-flight batch and waits for all of them.
    pub async fn join(&self) {
        join_all(self.workers().iter().map(Worker::join)).await;
    }

    /// Stops accepting records, drains what is buffered, then joins the
    /// workers. Concurrent callers all return once this has completed.
    pub async fn shutdown(&self) {
        self.shutdown
            .get_or_init(|| async {
                info!(
                    "Shutting down pipeline with {} pending records",
                    self.buffer.unfinished()
                );
                self.buffer.close();
                self.flush().await;
                self.join().await;
                let pending = self.buffer.unfinished();
                if pending > 0 {
                    warn!("Pipeline shut down with {pending} records undelivered");
                }
            })
            .await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.initialized()
    }

    /// Runs `f`, then shuts the pipeline down even if `f` panicked. The panic
    /// is resumed once shutdown completes.
    pub async fn run_scoped<'a, F, Fut, T>(&'a self, f: F) -> T
    where
        F: FnOnce(&'a Pipeline) -> Fut,
        Fut: Future<Output = T> + 'a,
    {
        let result = AssertUnwindSafe(f(self)).catch_unwind().await;
        self.shutdown().await;
        match result {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    fn workers(&self) -> &[Worker] {
        self.workers.get().map_or(&[], Vec::as_slice)
    }

    pub fn queue_len(&self) -> usize {
        self.buffer.len()
    }

    /// Accepted records not yet delivered or reported.
    pub fn pending(&self) -> usize {
        self.buffer.unfinished()
    }

    pub fn is_running(&self) -> bool {
        self.workers().iter().any(Worker::is_running)
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers().iter().map(Worker::state).collect()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
        if self.is_shut_down() {
            return;
        }
        let pending = self.buffer.unfinished();
        if pending > 0 {
            warn!("Pipeline dropped without shutdown, {pending} records left pending");
        }
    }
}

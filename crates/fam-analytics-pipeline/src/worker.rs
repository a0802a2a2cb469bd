// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::batcher::Batcher;
use crate::buffer::RecordBuffer;
use crate::uploader::Uploader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    /// Terminal.
    Stopped,
}

/// Flips the state to `Stopped` however the task ends, panics included.
struct StoppedOnDrop(watch::Sender<WorkerState>);

impl Drop for StoppedOnDrop {
    fn drop(&mut self) {
        self.0.send_replace(WorkerState::Stopped);
    }
}

/// Background task running batch-and-upload cycles until stopped.
#[derive(Debug)]
pub struct Worker {
    cancel: CancellationToken,
    state: watch::Receiver<WorkerState>,
}

impl Worker {
    /// Spawns the worker on the current tokio runtime. Cancelling `parent`
    /// stops it as well.
    pub fn spawn(
        id: usize,
        batcher: Batcher,
        uploader: Uploader,
        buffer: Arc<RecordBuffer>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let (state_tx, state) = watch::channel(WorkerState::Running);

        let token = cancel.clone();
        tokio::spawn(async move {
            let _stopped = StoppedOnDrop(state_tx);
            debug!("Worker {id} started");
            while !token.is_cancelled() {
                // Cancelling only interrupts the wait for records; an upload
                // in progress always runs to completion.
                let Some(batch) = batcher.next_batch(&token).await else {
                    break;
                };
                let size = batch.len();
                if AssertUnwindSafe(uploader.upload(batch))
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    error!("Worker {id} panicked while uploading {size} records");
                }
                buffer.complete(size);
            }
            debug!("Worker {id} stopped");
        });

        Worker { cancel, state }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Asks the worker to exit after its in-flight batch.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stops the worker and waits until it is `Stopped`. Safe to call
    /// repeatedly and from several tasks at once.
    pub async fn join(&self) {
        self.stop();
        self.stopped().await;
    }

    /// Resolves once the worker is `Stopped`, without asking it to stop.
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        // An error means the task is gone, and its guard has already
        // published `Stopped`.
        let _ = state
            .wait_for(|state| *state == WorkerState::Stopped)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{Destination, Route};
    use crate::error::DeliveryError;
    use crate::http::{HttpResponse, HttpSender, PreparedRequest};
    use crate::record::{Record, RecordKind};
    use crate::retry::{ImmediateRetry, RetryPolicy};
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Sink;

    impl Destination for Sink {
        fn name(&self) -> &str {
            "sink"
        }

        fn route_for(&self, _kind: RecordKind) -> Option<Route> {
            Some(Route::new("all", "http://sink/"))
        }

        fn build_request(
            &self,
            route: &Route,
            records: &[Record],
        ) -> Result<PreparedRequest, DeliveryError> {
            Ok(PreparedRequest::new(
                route.url.clone(),
                Value::from(records.len()),
            ))
        }
    }

    /// Counts delivered records, optionally taking a while per request.
    struct CountingSender {
        delivered: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl HttpSender for CountingSender {
        async fn post(&self, request: &PreparedRequest) -> Result<HttpResponse, DeliveryError> {
            tokio::time::sleep(self.delay).await;
            let count = request.body.as_u64().unwrap_or_default() as usize;
            self.delivered.fetch_add(count, Ordering::SeqCst);
            Ok(HttpResponse {
                status: 200,
                body: String::new(),
            })
        }
    }

    fn setup(delay: Duration) -> (Arc<RecordBuffer>, Batcher, Uploader, Arc<CountingSender>) {
        let buffer = Arc::new(RecordBuffer::new(1_000));
        let sender = Arc::new(CountingSender {
            delivered: AtomicUsize::new(0),
            delay,
        });
        let uploader = Uploader::new(
            Arc::new(Sink),
            Arc::clone(&sender) as Arc<dyn HttpSender>,
            RetryPolicy::new(1, Arc::new(ImmediateRetry)),
            None,
        );
        let batcher = Batcher::new(Arc::clone(&buffer), 10, None);
        (buffer, batcher, uploader, sender)
    }

    fn record() -> Record {
        Record::new(RecordKind::Track, Map::new())
    }

    #[tokio::test]
    async fn test_worker_delivers_and_settles() {
        let (buffer, batcher, uploader, sender) = setup(Duration::ZERO);
        let parent = CancellationToken::new();
        let worker = Worker::spawn(0, batcher, uploader, Arc::clone(&buffer), &parent);
        assert_eq!(worker.state(), WorkerState::Running);

        for _ in 0..35 {
            assert!(buffer.enqueue(record()));
        }
        tokio::time::timeout(Duration::from_secs(2), buffer.wait_settled())
            .await
            .expect("worker should drain the buffer");
        assert_eq!(sender.delivered.load(Ordering::SeqCst), 35);

        worker.join().await;
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_join_waits_for_in_flight_upload() {
        let (buffer, batcher, uploader, sender) = setup(Duration::from_millis(100));
        let parent = CancellationToken::new();
        let worker = Worker::spawn(1, batcher, uploader, Arc::clone(&buffer), &parent);

        for _ in 0..5 {
            buffer.enqueue(record());
        }
        // Let the worker pick the batch up before asking it to stop.
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.join().await;

        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(sender.delivered.load(Ordering::SeqCst), 5);
        assert_eq!(buffer.unfinished(), 0);
    }

    #[tokio::test]
    async fn test_join_is_idempotent_and_concurrent() {
        let (buffer, batcher, uploader, _sender) = setup(Duration::ZERO);
        let parent = CancellationToken::new();
        let worker = Arc::new(Worker::spawn(2, batcher, uploader, buffer, &parent));

        let joins: Vec<_> = (0..3)
            .map(|_| {
                let worker = Arc::clone(&worker);
                tokio::spawn(async move { worker.join().await })
            })
            .collect();
        for join in joins {
            join.await.expect("join task panicked");
        }
        worker.join().await;
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_worker() {
        let (buffer, batcher, uploader, _sender) = setup(Duration::ZERO);
        let parent = CancellationToken::new();
        let worker = Worker::spawn(3, batcher, uploader, buffer, &parent);
        parent.cancel();

        let mut state = worker.state.clone();
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == WorkerState::Stopped),
        )
        .await
        .expect("worker should stop")
        .expect("state channel open or already stopped");
    }

    struct PanickingSender;

    #[async_trait]
    impl HttpSender for PanickingSender {
        async fn post(&self, _request: &PreparedRequest) -> Result<HttpResponse, DeliveryError> {
            panic!("sender bug");
        }
    }

    #[tokio::test]
    async fn test_panicking_upload_reports_every_record() {
        let buffer = Arc::new(RecordBuffer::new(100));
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let uploader = Uploader::new(
            Arc::new(Sink),
            Arc::new(PanickingSender),
            RetryPolicy::new(2, Arc::new(ImmediateRetry)),
            Some(Arc::new(move |e: &DeliveryError, records: &[Record]| {
                sink.lock().unwrap().push((e.clone(), records.len()));
            })),
        );
        let batcher = Batcher::new(Arc::clone(&buffer), 10, None);
        let worker = Worker::spawn(4, batcher, uploader, Arc::clone(&buffer), &CancellationToken::new());

        for _ in 0..3 {
            assert!(buffer.enqueue(record()));
        }
        tokio::time::timeout(Duration::from_secs(2), buffer.wait_settled())
            .await
            .expect("worker should settle the batch");

        let total: usize = reported.lock().unwrap().iter().map(|(_, n)| n).sum();
        assert_eq!(total, 3);
        assert!(reported
            .lock()
            .unwrap()
            .iter()
            .all(|(e, _)| matches!(e, DeliveryError::Panicked(_))));
        assert!(worker.is_running());
        worker.join().await;
    }
}

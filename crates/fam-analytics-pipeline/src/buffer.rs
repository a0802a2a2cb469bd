// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO shared between the producers calling `enqueue` and the
//! workers draining batches.
//!
//! ```text
//!   enqueue (sync, never waits)          drain (async, cancellable)
//!        │                                      ▲
//!        v                                      │
//!   ┌─────────────────────────────────────────────┐
//!   │ Mutex<VecDeque<Record>>   capacity C        │──> Notify wakes one waiter
//!   └─────────────────────────────────────────────┘
//!        │
//!        v
//!   unfinished count (watch) ── complete(n) ──> wait_settled()
//! ```
//!
//! The queue lock is only ever held for a push or a pop, never across an
//! await point, so producers see at most a short critical section.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::record::Record;

/// Upper bounds applied to a single drain call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainLimits {
    /// Maximum number of records to return.
    pub max_records: usize,
    /// Maximum summed encoded size. A lone record bigger than this is still
    /// returned on its own so it can be delivered or reported.
    pub max_bytes: Option<usize>,
}

impl DrainLimits {
    pub fn records(max_records: usize) -> Self {
        DrainLimits {
            max_records,
            max_bytes: None,
        }
    }
}

#[derive(Debug)]
pub struct RecordBuffer {
    queue: Mutex<VecDeque<Record>>,
    capacity: usize,
    available: Notify,
    closed: AtomicBool,
    // Accepted records not yet uploaded or reported.
    unfinished: watch::Sender<usize>,
}

impl RecordBuffer {
    /// Creates a buffer holding at most `capacity` records. A zero capacity
    /// is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (unfinished, _) = watch::channel(0);
        RecordBuffer {
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            available: Notify::new(),
            closed: AtomicBool::new(false),
            unfinished,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Record>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a record without waiting. Returns `false` when the buffer is
    /// full or closed; the record is not retained in that case.
    pub fn enqueue(&self, record: Record) -> bool {
        {
            let mut queue = self.lock();
            if self.closed.load(Ordering::Acquire) || queue.len() >= self.capacity {
                return false;
            }
            queue.push_back(record);
            self.unfinished.send_modify(|count| *count += 1);
        }
        self.available.notify_one();
        true
    }

    /// Waits for at least one record, then takes every record already queued
    /// up to `limits`. Returns an empty vector when `cancel` fires or when the
    /// buffer is closed and empty.
    pub async fn drain(&self, limits: DrainLimits, cancel: &CancellationToken) -> Vec<Record> {
        loop {
            // Registered before inspecting the queue so a concurrent enqueue
            // cannot slip between the check and the wait.
            let notified = self.available.notified();
            {
                let mut queue = self.lock();
                if !queue.is_empty() {
                    let records = Self::take(&mut queue, limits);
                    let more = !queue.is_empty();
                    drop(queue);
                    if more {
                        // Pass the wakeup on to the next idle worker.
                        self.available.notify_one();
                    }
                    trace!("Drained {} records from buffer", records.len());
                    return records;
                }
                if self.is_closed() {
                    return Vec::new();
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Vec::new(),
                () = notified => {}
            }
        }
    }

    /// Non-blocking variant of [`RecordBuffer::drain`].
    pub fn try_drain(&self, limits: DrainLimits) -> Vec<Record> {
        let mut queue = self.lock();
        Self::take(&mut queue, limits)
    }

    fn take(queue: &mut VecDeque<Record>, limits: DrainLimits) -> Vec<Record> {
        let max_records = limits.max_records.max(1);
        let mut records = Vec::with_capacity(max_records.min(queue.len()));
        let mut bytes = 0;
        while records.len() < max_records {
            let Some(front) = queue.front() else {
                break;
            };
            if let Some(max_bytes) = limits.max_bytes {
                let size = front.encoded_len();
                if !records.is_empty() && bytes + size > max_bytes {
                    break;
                }
                bytes += size;
            }
            match queue.pop_front() {
                Some(record) => records.push(record),
                None => break,
            }
        }
        records
    }

    /// Marks `count` drained records as delivered or reported.
    pub fn complete(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.unfinished
            .send_modify(|unfinished| *unfinished = unfinished.saturating_sub(count));
    }

    /// Resolves once the buffer is empty and no drained record is still in
    /// flight. Records enqueued concurrently may extend the wait.
    pub async fn wait_settled(&self) {
        let mut rx = self.unfinished.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|unfinished| *unfinished == 0).await;
    }

    /// Stops accepting records and wakes every idle drainer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Accepted records that are queued or being uploaded.
    pub fn unfinished(&self) -> usize {
        *self.unfinished.borrow()
    }
}

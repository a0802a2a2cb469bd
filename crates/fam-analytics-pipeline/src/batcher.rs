// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::buffer::{DrainLimits, RecordBuffer};
use crate::record::Record;

/// An ordered, non-empty group of records taken from the buffer in one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    records: Vec<Record>,
}

impl Batch {
    /// Returns `None` for an empty vector.
    pub fn new(records: Vec<Record>) -> Option<Self> {
        if records.is_empty() {
            None
        } else {
            Some(Batch { records })
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Summed encoded size of every record.
    pub fn encoded_len(&self) -> usize {
        self.records.iter().map(Record::encoded_len).sum()
    }
}

/// Forms batches for one worker. Several batchers may share a buffer.
#[derive(Debug, Clone)]
pub struct Batcher {
    buffer: Arc<RecordBuffer>,
    limits: DrainLimits,
}

impl Batcher {
    pub fn new(buffer: Arc<RecordBuffer>, upload_size: usize, max_batch_bytes: Option<usize>) -> Self {
        Batcher {
            buffer,
            limits: DrainLimits {
                max_records: upload_size.max(1),
                max_bytes: max_batch_bytes,
            },
        }
    }

    /// Waits for the first record, then greedily takes whatever else is
    /// already queued. `None` means there is no more work: the token fired or
    /// the buffer is closed and empty.
    pub async fn next_batch(&self, cancel: &CancellationToken) -> Option<Batch> {
        let records = self.buffer.drain(self.limits, cancel).await;
        let batch = Batch::new(records)?;
        debug!(
            "Formed batch of {} records ({} bytes)",
            batch.len(),
            batch.encoded_len()
        );
        Some(batch)
    }
}

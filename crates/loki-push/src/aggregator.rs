// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Grouping of entries into streams and size-bounded batching.
//!
//! A [`Batch`] groups entries by their [`StreamKey`]: entries with the same
//! label set share one [`Stream`], kept in arrival order. Streams are also
//! kept in the order they were first seen so the wire payload is stable.
//!
//! A [`BatchAggregator`] owns the batch of one source event. After every
//! append it compares the estimated wire size with its threshold and, once
//! reached, hands the batch to its [`PushSink`] and starts over with an empty
//! batch. [`BatchAggregator::finalize`] delivers whatever is left.
//!
//! Entries are never reordered or deduplicated. Time ordering inside a
//! stream is left to the receiving endpoint.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use crate::constants::{DEFAULT_BATCH_SIZE_BYTES, ENTRY_OVERHEAD_BYTES, STREAM_OVERHEAD_BYTES};
use crate::labels::{LabelSet, StreamKey};
use crate::loki::DeliveryError;

/// Entry rejected before it reached a stream. The rest of the batch is unaffected.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid entry: {reason}")]
pub struct InvalidEntry {
    pub reason: &'static str,
}

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error(transparent)]
    InvalidEntry(#[from] InvalidEntry),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// One log line with its labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub labels: LabelSet,
    pub line: String,
    pub timestamp: OffsetDateTime,
}

impl Entry {
    pub fn new(labels: LabelSet, line: impl Into<String>, timestamp: OffsetDateTime) -> Self {
        Entry {
            labels,
            line: line.into(),
            timestamp,
        }
    }

    /// Entry stamped with the current time.
    pub fn now(labels: LabelSet, line: impl Into<String>) -> Self {
        Self::new(labels, line, OffsetDateTime::now_utc())
    }

    fn estimated_size(&self) -> usize {
        self.line.len() + ENTRY_OVERHEAD_BYTES
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub timestamp: OffsetDateTime,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    key: StreamKey,
    labels: LabelSet,
    entries: Vec<StreamEntry>,
}

impl Stream {
    #[must_use]
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    #[must_use]
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    #[must_use]
    pub fn entries(&self) -> &[StreamEntry] {
        &self.entries
    }
}

/// Streams accumulated for one delivery.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    streams: Vec<Stream>,
    index: HashMap<StreamKey, usize>,
    total_bytes: usize,
}

impl Batch {
    /// Adds `entry` to the stream of its label set, creating the stream if needed.
    pub fn push(&mut self, entry: Entry) -> Result<(), InvalidEntry> {
        if entry.labels.is_empty() {
            return Err(InvalidEntry {
                reason: "a stream needs at least one label",
            });
        }

        self.total_bytes += entry.estimated_size();
        let key = entry.labels.stream_key();
        let position = match self.index.get(&key) {
            Some(position) => *position,
            None => {
                self.total_bytes += key.len() + STREAM_OVERHEAD_BYTES;
                self.streams.push(Stream {
                    key: key.clone(),
                    labels: entry.labels,
                    entries: Vec::new(),
                });
                self.index.insert(key, self.streams.len() - 1);
                self.streams.len() - 1
            }
        };

        self.streams[position].entries.push(StreamEntry {
            timestamp: entry.timestamp,
            line: entry.line,
        });
        Ok(())
    }

    #[must_use]
    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    #[must_use]
    pub fn stream(&self, key: &StreamKey) -> Option<&Stream> {
        self.index.get(key).map(|position| &self.streams[*position])
    }

    /// Estimated wire size, in bytes.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.streams.iter().map(|s| s.entries.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn clear(&mut self) {
        self.streams.clear();
        self.index.clear();
        self.total_bytes = 0;
    }
}

/// Destination of full batches.
///
/// The sink only borrows the batch for the duration of the call.
#[async_trait]
pub trait PushSink: Send + Sync {
    async fn push(&self, batch: &Batch) -> Result<(), DeliveryError>;
}

/// Batch of one source event, flushed to a [`PushSink`] whenever it grows
/// past `max_bytes`.
pub struct BatchAggregator<'a> {
    batch: Batch,
    max_bytes: usize,
    sink: &'a dyn PushSink,
}

impl<'a> BatchAggregator<'a> {
    #[must_use]
    pub fn new(sink: &'a dyn PushSink, max_bytes: usize) -> Self {
        BatchAggregator {
            batch: Batch::default(),
            max_bytes,
            sink,
        }
    }

    #[must_use]
    pub fn with_default_size(sink: &'a dyn PushSink) -> Self {
        Self::new(sink, DEFAULT_BATCH_SIZE_BYTES)
    }

    /// Appends `entry`, delivering the batch first if it reached the threshold.
    ///
    /// An [`InvalidEntry`] leaves the batch untouched. A delivery failure
    /// discards the batch contents and is returned to the caller.
    pub async fn append(&mut self, entry: Entry) -> Result<(), AggregatorError> {
        self.batch.push(entry)?;
        if self.batch.total_bytes() >= self.max_bytes {
            debug!(
                "PUSH | Batch reached {} bytes (threshold {}), flushing",
                self.batch.total_bytes(),
                self.max_bytes
            );
            self.flush().await?;
        }
        Ok(())
    }

    /// Delivers the remaining entries, if any.
    pub async fn finalize(mut self) -> Result<(), DeliveryError> {
        self.flush().await
    }

    #[must_use]
    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    async fn flush(&mut self) -> Result<(), DeliveryError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let result = self.sink.push(&self.batch).await;
        self.batch.clear();
        result
    }
}

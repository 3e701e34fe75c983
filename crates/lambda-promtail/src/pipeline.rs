// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-invocation path from a raw line to the batch.
//!
//! Labels of an entry are merged right-biased in this order:
//!
//! ```text
//! adapter labels ⊕ extra labels ⊕ {region} ⊕ flatten(line)
//! ```

use loki_push::aggregator::{AggregatorError, BatchAggregator, Entry, PushSink};
use loki_push::flatten::merge_flattened;
use loki_push::labels::LabelSet;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::errors::Error;
use crate::geoip::RegionAnnotator;

/// Settings shared by every invocation.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub extra_labels: LabelSet,
    pub batch_size: usize,
    pub keep_stream: bool,
    pub print_log_line: bool,
}

/// Owns the batch of one invocation.
pub struct Pipeline<'a> {
    aggregator: BatchAggregator<'a>,
    settings: &'a PipelineSettings,
    annotator: &'a dyn RegionAnnotator,
    entries: usize,
    skipped: usize,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(
        sink: &'a dyn PushSink,
        settings: &'a PipelineSettings,
        annotator: &'a dyn RegionAnnotator,
    ) -> Self {
        Pipeline {
            aggregator: BatchAggregator::new(sink, settings.batch_size),
            settings,
            annotator,
            entries: 0,
            skipped: 0,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        self.settings
    }

    /// Labels `line` and appends it. Entries without any label are logged and
    /// skipped; delivery failures are returned.
    pub async fn process(
        &mut self,
        adapter_labels: &LabelSet,
        line: String,
        timestamp: OffsetDateTime,
    ) -> Result<(), Error> {
        if self.settings.print_log_line {
            info!("{line}");
        }

        let mut labels = adapter_labels.merge(&self.settings.extra_labels);
        if let Some(region) = self.annotator.annotate(&line) {
            labels.merge_from(&region);
        }
        let labels = merge_flattened(&labels, &line);

        match self
            .aggregator
            .append(Entry::new(labels, line, timestamp))
            .await
        {
            Ok(()) => {
                self.entries += 1;
                Ok(())
            }
            Err(AggregatorError::InvalidEntry(e)) => {
                warn!("PUSH | Skipping entry: {e}");
                self.skipped += 1;
                Ok(())
            }
            Err(AggregatorError::Delivery(e)) => Err(e.into()),
        }
    }

    /// Delivers what is left and returns the number of accepted and skipped entries.
    pub async fn finalize(self) -> Result<(usize, usize), Error> {
        self.aggregator.finalize().await?;
        Ok((self.entries, self.skipped))
    }
}

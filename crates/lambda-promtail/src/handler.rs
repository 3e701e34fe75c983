// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use loki_push::aggregator::PushSink;
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::adapters::s3::ObjectStore;
use crate::adapters::{cloudwatch, generic, kinesis, s3, sqs};
use crate::errors::Error;
use crate::event::{classify, EventKind};
use crate::geoip::RegionAnnotator;
use crate::pipeline::{Pipeline, PipelineSettings};

/// Serves invocations. Holds everything that outlives a single event; the
/// batch itself is created per invocation.
pub struct Handler {
    settings: PipelineSettings,
    sink: Box<dyn PushSink>,
    annotator: Box<dyn RegionAnnotator>,
    objects: Box<dyn ObjectStore>,
}

impl Handler {
    #[must_use]
    pub fn new(
        settings: PipelineSettings,
        sink: Box<dyn PushSink>,
        annotator: Box<dyn RegionAnnotator>,
        objects: Box<dyn ObjectStore>,
    ) -> Self {
        Handler {
            settings,
            sink,
            annotator,
            objects,
        }
    }

    /// Classifies `event`, ships its lines and delivers what is left of the batch.
    pub async fn handle(&self, event: Value) -> Result<(), Error> {
        let kind = classify(event);
        debug!("HANDLER | Received {} event", kind.name());

        let mut pipeline = Pipeline::new(
            self.sink.as_ref(),
            &self.settings,
            self.annotator.as_ref(),
        );
        match &kind {
            EventKind::S3(event) => s3::process(event, self.objects.as_ref(), &mut pipeline).await?,
            EventKind::S3Test => debug!("HANDLER | Acknowledged S3 test event"),
            EventKind::CloudWatch(event) => cloudwatch::process(event, &mut pipeline).await?,
            EventKind::Kinesis(event) => kinesis::process(event, &mut pipeline).await?,
            EventKind::Sqs(event) => sqs::process(event, self.objects.as_ref(), &mut pipeline).await?,
            EventKind::Unrecognized(event) => {
                debug!("HANDLER | Unrecognized event, shipping it as a single line");
                generic::process(event, &mut pipeline).await?;
            }
        }

        let (entries, skipped) = pipeline.finalize().await?;
        debug!(
            "HANDLER | Processed {} event: {entries} entries, {skipped} skipped",
            kind.name()
        );
        Ok(())
    }

    /// Like [`Handler::handle`], failing with [`Error::Timeout`] once `budget` elapses.
    pub async fn handle_with_deadline(
        &self,
        event: Value,
        budget: Option<Duration>,
    ) -> Result<(), Error> {
        match budget {
            Some(budget) => tokio::time::timeout(budget, self.handle(event))
                .await
                .map_err(|_| Error::Timeout(budget))?,
            None => self.handle(event).await,
        }
    }
}

/// Time left until `deadline_ms` (milliseconds since the epoch). `None` when
/// no deadline is known.
#[must_use]
pub fn remaining_time(deadline_ms: u64, now: SystemTime) -> Option<Duration> {
    if deadline_ms == 0 {
        return None;
    }
    let deadline = UNIX_EPOCH + Duration::from_millis(deadline_ms);
    Some(deadline.duration_since(now).unwrap_or(Duration::ZERO))
}

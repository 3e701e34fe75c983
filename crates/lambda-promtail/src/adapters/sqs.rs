// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! SQS messages. A body that is itself a known source event (for example an
//! S3 notification delivered through a queue) is handed to that adapter.
//! Nested SQS envelopes and everything else are shipped as plain lines.

use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use super::{cloudwatch, kinesis, s3, static_labels};
use crate::adapters::s3::ObjectStore;
use crate::errors::Error;
use crate::event::{classify, EventKind, SqsEvent, SqsMessage};
use crate::pipeline::Pipeline;

const KIND: &str = "sqs";

pub async fn process(
    event: &SqsEvent,
    store: &dyn ObjectStore,
    pipeline: &mut Pipeline<'_>,
) -> Result<(), Error> {
    for message in &event.records {
        let nested = serde_json::from_str::<Value>(&message.body)
            .ok()
            .map(classify);
        match nested {
            Some(EventKind::S3(event)) => s3::process(&event, store, pipeline).await?,
            Some(EventKind::S3Test) => {
                debug!("SQS | Skipping S3 test event in message {}", message.message_id);
            }
            Some(EventKind::CloudWatch(event)) => cloudwatch::process(&event, pipeline).await?,
            Some(EventKind::Kinesis(event)) => kinesis::process(&event, pipeline).await?,
            Some(EventKind::Sqs(_) | EventKind::Unrecognized(_)) | None => {
                process_body(message, pipeline).await?;
            }
        }
    }
    Ok(())
}

async fn process_body(message: &SqsMessage, pipeline: &mut Pipeline<'_>) -> Result<(), Error> {
    let labels = static_labels([
        ("__aws_log_type", KIND),
        ("__aws_sqs_event_source_arn", message.event_source_arn.as_str()),
    ]);
    pipeline
        .process(&labels, message.body.clone(), OffsetDateTime::now_utc())
        .await
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use time::OffsetDateTime;
use tracing::debug;

use super::{gunzip, static_labels};
use crate::errors::Error;
use crate::event::{CloudwatchLogsData, CloudwatchLogsEvent};
use crate::pipeline::Pipeline;

const KIND: &str = "cloudwatch";
const CONTROL_MESSAGE: &str = "CONTROL_MESSAGE";

/// Decodes the base64, gzip compressed payload of a subscription event.
pub fn decode(event: &CloudwatchLogsEvent) -> Result<CloudwatchLogsData, Error> {
    let compressed = STANDARD
        .decode(event.awslogs.data.trim())
        .map_err(|e| Error::Decode {
            kind: KIND,
            message: e.to_string(),
        })?;
    let payload = gunzip(&compressed, "cloudwatch logs payload")?;
    serde_json::from_slice(&payload).map_err(|e| Error::Decode {
        kind: KIND,
        message: e.to_string(),
    })
}

pub async fn process(event: &CloudwatchLogsEvent, pipeline: &mut Pipeline<'_>) -> Result<(), Error> {
    let data = decode(event)?;
    if data.message_type == CONTROL_MESSAGE {
        debug!("CLOUDWATCH | Skipping control message for {}", data.log_group);
        return Ok(());
    }

    let mut pairs = vec![
        ("__aws_log_type", KIND),
        ("__aws_cloudwatch_log_group", data.log_group.as_str()),
        ("__aws_cloudwatch_owner", data.owner.as_str()),
    ];
    if pipeline.settings().keep_stream {
        pairs.push(("__aws_cloudwatch_log_stream", data.log_stream.as_str()));
    }
    let labels = static_labels(pairs);

    for log_event in data.log_events {
        let timestamp =
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(log_event.timestamp) * 1_000_000)
                .unwrap_or_else(|_| OffsetDateTime::now_utc());
        pipeline
            .process(&labels, log_event.message, timestamp)
            .await?;
    }
    Ok(())
}

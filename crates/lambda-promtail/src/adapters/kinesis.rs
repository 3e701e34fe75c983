// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::borrow::Cow;
use time::OffsetDateTime;

use super::{gunzip, is_gzip, static_labels};
use crate::errors::Error;
use crate::event::{KinesisEvent, KinesisEventRecord};
use crate::pipeline::Pipeline;

const KIND: &str = "kinesis";

/// Record payload, gunzipped when it carries the gzip magic.
pub fn record_line(record: &KinesisEventRecord) -> Result<String, Error> {
    let data = STANDARD
        .decode(record.kinesis.data.trim())
        .map_err(|e| Error::Decode {
            kind: KIND,
            message: e.to_string(),
        })?;
    let data = if is_gzip(&data) {
        Cow::Owned(gunzip(&data, "kinesis record")?)
    } else {
        Cow::Borrowed(data.as_slice())
    };
    Ok(String::from_utf8_lossy(&data).into_owned())
}

fn arrival_time(record: &KinesisEventRecord) -> OffsetDateTime {
    let seconds = record.kinesis.approximate_arrival_timestamp;
    (seconds > 0.0)
        .then(|| OffsetDateTime::from_unix_timestamp_nanos((seconds * 1e9) as i128).ok())
        .flatten()
        .unwrap_or_else(OffsetDateTime::now_utc)
}

pub async fn process(event: &KinesisEvent, pipeline: &mut Pipeline<'_>) -> Result<(), Error> {
    for record in &event.records {
        let labels = static_labels([
            ("__aws_log_type", KIND),
            ("__aws_kinesis_event_source_arn", record.event_source_arn.as_str()),
        ]);
        let line = record_line(record)?;
        pipeline
            .process(&labels, line, arrival_time(record))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::adapters::testing::{gzip_base64, settings, CapturingSink};
    use crate::event::KinesisRecord;
    use crate::geoip::NoopAnnotator;
    use time::macros::datetime;

    const ARN: &str = "arn:aws:kinesis:us-east-1:123456789012:stream/logs";

    fn record(data: String, arrival: f64) -> KinesisEventRecord {
        KinesisEventRecord {
            event_source_arn: ARN.to_string(),
            kinesis: KinesisRecord {
                data,
                approximate_arrival_timestamp: arrival,
            },
        }
    }

    #[test]
    fn plain_and_gzipped_records_decode() {
        let plain = record(STANDARD.encode("hello kinesis"), 0.0);
        assert_eq!(record_line(&plain).unwrap(), "hello kinesis");

        let gzipped = record(gzip_base64(b"compressed line"), 0.0);
        assert_eq!(record_line(&gzipped).unwrap(), "compressed line");

        let invalid = record("not base64!".to_string(), 0.0);
        assert!(matches!(
            record_line(&invalid),
            Err(Error::Decode { kind: "kinesis", .. })
        ));
    }

    #[tokio::test]
    async fn one_entry_per_record() {
        let sink = CapturingSink::default();
        let settings = settings();
        let mut pipeline = Pipeline::new(&sink, &settings, &NoopAnnotator);
        let event = KinesisEvent {
            records: vec![
                record(STANDARD.encode("first"), 1_678_418_456.5),
                record(gzip_base64(b"second"), 1_678_418_457.0),
            ],
        };

        process(&event, &mut pipeline).await.unwrap();
        pipeline.finalize().await.unwrap();

        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!(
            delivered[0].0,
            format!(r#"{{__aws_kinesis_event_source_arn="{ARN}", __aws_log_type="kinesis"}}"#)
        );
        assert_eq!(delivered[0].1, "first");
        assert_eq!(delivered[0].2, datetime!(2023-03-10 03:20:56.5 UTC));
        assert_eq!(delivered[1].1, "second");
    }
}

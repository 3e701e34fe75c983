// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Events of no known source. The whole event is one line, labelled by its
//! own flattened fields.

use loki_push::labels::LabelSet;
use serde_json::Value;
use time::OffsetDateTime;

use crate::errors::Error;
use crate::pipeline::Pipeline;

pub async fn process(event: &Value, pipeline: &mut Pipeline<'_>) -> Result<(), Error> {
    let line = serde_json::to_string(event).map_err(|e| Error::Decode {
        kind: "unrecognized",
        message: e.to_string(),
    })?;
    pipeline
        .process(&LabelSet::new(), line, OffsetDateTime::now_utc())
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::adapters::testing::{settings, CapturingSink};
    use crate::geoip::NoopAnnotator;
    use serde_json::json;

    #[tokio::test]
    async fn event_is_one_line_labelled_by_its_fields() {
        let sink = CapturingSink::default();
        let settings = settings();
        let mut pipeline = Pipeline::new(&sink, &settings, &NoopAnnotator);
        let event = json!({"source": "aws.events", "detail": {"state": "stopped", "count": 2}});

        process(&event, &mut pipeline).await.unwrap();
        pipeline.finalize().await.unwrap();

        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(
            delivered[0].0,
            r#"{detail__count="2", detail__state="stopped", source="aws.events"}"#
        );
        assert!(!delivered[0].1.contains(' '));
        assert_eq!(
            serde_json::from_str::<Value>(&delivered[0].1).unwrap(),
            event
        );
    }

    #[tokio::test]
    async fn extra_labels_apply_to_the_fallback() {
        let sink = CapturingSink::default();
        let mut settings = settings();
        settings.extra_labels = LabelSet::try_from_pairs([("__extra_team", "ops")]).unwrap();
        let mut pipeline = Pipeline::new(&sink, &settings, &NoopAnnotator);

        process(&json!(["a", "b"]), &mut pipeline).await.unwrap();
        pipeline.finalize().await.unwrap();

        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(
            delivered[0].0,
            r#"{_0="a", _1="b", __extra_team="ops"}"#
        );
        assert_eq!(delivered[0].1, r#"["a","b"]"#);
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Push wire format.
//!
//! The Loki push endpoint accepts a protobuf `PushRequest` compressed with
//! raw (block format) snappy:
//!
//! ```text
//! PushRequest
//!   └── streams[]      labels: "{name=\"value\", ...}"
//!         └── entries[]  timestamp, line
//! ```

use prost::Message;
use time::OffsetDateTime;

use crate::aggregator::Batch;

#[derive(Clone, PartialEq, Message)]
pub struct PushRequest {
    #[prost(message, repeated, tag = "1")]
    pub streams: Vec<StreamAdapter>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StreamAdapter {
    /// Rendered stream key.
    #[prost(string, tag = "1")]
    pub labels: String,
    #[prost(message, repeated, tag = "2")]
    pub entries: Vec<EntryAdapter>,
    /// Always zero from clients; the server computes it.
    #[prost(uint64, tag = "3")]
    pub hash: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct EntryAdapter {
    #[prost(message, optional, tag = "1")]
    pub timestamp: Option<prost_types::Timestamp>,
    #[prost(string, tag = "2")]
    pub line: String,
}

/// Builds the push request for `batch`, preserving stream and entry order.
#[must_use]
pub fn to_push_request(batch: &Batch) -> PushRequest {
    PushRequest {
        streams: batch
            .streams()
            .iter()
            .map(|stream| StreamAdapter {
                labels: stream.key().to_string(),
                entries: stream
                    .entries()
                    .iter()
                    .map(|entry| EntryAdapter {
                        timestamp: Some(to_timestamp(entry.timestamp)),
                        line: entry.line.clone(),
                    })
                    .collect(),
                hash: 0,
            })
            .collect(),
    }
}

/// Serializes and compresses `batch` into a request body.
pub fn encode(batch: &Batch) -> Result<Vec<u8>, snap::Error> {
    let buf = to_push_request(batch).encode_to_vec();
    snap::raw::Encoder::new().compress_vec(&buf)
}

fn to_timestamp(ts: OffsetDateTime) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: ts.unix_timestamp(),
        nanos: i32::try_from(ts.nanosecond()).unwrap_or_default(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::aggregator::Entry;
    use crate::labels::LabelSet;

    fn decode(body: &[u8]) -> PushRequest {
        let raw = snap::raw::Decoder::new().decompress_vec(body).unwrap();
        PushRequest::decode(raw.as_slice()).unwrap()
    }

    #[test]
    fn encode_round_trips_streams_in_arrival_order() {
        let web = LabelSet::try_from_pairs([("app", "web")]).unwrap();
        let db = LabelSet::try_from_pairs([("app", "db")]).unwrap();
        let ts = OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_123_456_789).unwrap();

        let mut batch = Batch::default();
        batch.push(Entry::new(web.clone(), "first", ts)).unwrap();
        batch.push(Entry::new(db, "second", ts)).unwrap();
        batch.push(Entry::new(web, "third", ts)).unwrap();

        let request = decode(&encode(&batch).unwrap());

        assert_eq!(request.streams.len(), 2);
        assert_eq!(request.streams[0].labels, r#"{app="web"}"#);
        assert_eq!(request.streams[1].labels, r#"{app="db"}"#);
        let lines: Vec<_> = request.streams[0]
            .entries
            .iter()
            .map(|e| e.line.as_str())
            .collect();
        assert_eq!(lines, vec!["first", "third"]);
        assert_eq!(
            request.streams[0].entries[0].timestamp,
            Some(prost_types::Timestamp {
                seconds: 1_700_000_000,
                nanos: 123_456_789,
            })
        );
    }

    #[test]
    fn empty_batch_encodes_to_empty_request() {
        let request = decode(&encode(&Batch::default()).unwrap());
        assert!(request.streams.is_empty());
    }
}

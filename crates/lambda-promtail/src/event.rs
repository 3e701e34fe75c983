// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Source event envelopes and their classification.
//!
//! An incoming payload is matched against an ordered list of predicates;
//! the first one that recognises the payload and decodes it wins:
//!
//! 1. S3 notification (`Records[*].eventSource == "aws:s3"`)
//! 2. S3 test event (`Event == "s3:TestEvent"`)
//! 3. CloudWatch Logs subscription (`awslogs.data`)
//! 4. Kinesis (`Records[*].eventSource == "aws:kinesis"`)
//! 5. SQS (`Records[*].eventSource == "aws:sqs"`)
//!
//! Anything else is [`EventKind::Unrecognized`] and goes to the generic
//! fallback adapter. Classification has no side effects.

use serde::Deserialize;
use serde_json::Value;

const S3_SOURCE: &str = "aws:s3";
const KINESIS_SOURCE: &str = "aws:kinesis";
const SQS_SOURCE: &str = "aws:sqs";
const S3_TEST_EVENT: &str = "s3:TestEvent";

#[derive(Debug, Clone, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records")]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3EventRecord {
    #[serde(default)]
    pub aws_region: String,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Bucket {
    pub name: String,
    #[serde(default)]
    pub owner_identity: S3UserIdentity,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3UserIdentity {
    #[serde(default)]
    pub principal_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Object {
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudwatchLogsEvent {
    pub awslogs: CloudwatchLogsRawData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudwatchLogsRawData {
    /// Base64 encoded, gzip compressed [`CloudwatchLogsData`].
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudwatchLogsData {
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub log_group: String,
    #[serde(default)]
    pub log_stream: String,
    #[serde(default)]
    pub log_events: Vec<CloudwatchLogEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudwatchLogEvent {
    #[serde(default)]
    pub id: String,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KinesisEvent {
    #[serde(rename = "Records")]
    pub records: Vec<KinesisEventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KinesisEventRecord {
    #[serde(rename = "eventSourceARN", default)]
    pub event_source_arn: String,
    pub kinesis: KinesisRecord,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KinesisRecord {
    /// Base64 encoded record payload.
    pub data: String,
    /// Seconds since the epoch, with a fractional part.
    #[serde(default)]
    pub approximate_arrival_timestamp: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqsEvent {
    #[serde(rename = "Records")]
    pub records: Vec<SqsMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqsMessage {
    #[serde(rename = "messageId", default)]
    pub message_id: String,
    #[serde(rename = "eventSourceARN", default)]
    pub event_source_arn: String,
    #[serde(default)]
    pub body: String,
}

/// A classified source event.
#[derive(Debug, Clone)]
pub enum EventKind {
    S3(S3Event),
    S3Test,
    CloudWatch(CloudwatchLogsEvent),
    Kinesis(KinesisEvent),
    Sqs(SqsEvent),
    Unrecognized(Value),
}

impl EventKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::S3(_) => "s3",
            EventKind::S3Test => "s3 test",
            EventKind::CloudWatch(_) => "cloudwatch",
            EventKind::Kinesis(_) => "kinesis",
            EventKind::Sqs(_) => "sqs",
            EventKind::Unrecognized(_) => "unrecognized",
        }
    }
}

type Predicate = fn(&Value) -> Option<EventKind>;

const PREDICATES: [Predicate; 5] = [as_s3, as_s3_test, as_cloudwatch, as_kinesis, as_sqs];

fn as_s3(event: &Value) -> Option<EventKind> {
    records_from(event, S3_SOURCE).map(EventKind::S3)
}

fn as_s3_test(event: &Value) -> Option<EventKind> {
    (event.get("Event").and_then(Value::as_str) == Some(S3_TEST_EVENT)).then_some(EventKind::S3Test)
}

fn as_cloudwatch(event: &Value) -> Option<EventKind> {
    event
        .get("awslogs")
        .and_then(|awslogs| awslogs.get("data"))
        .and_then(Value::as_str)?;
    serde_json::from_value(event.clone())
        .ok()
        .map(EventKind::CloudWatch)
}

fn as_kinesis(event: &Value) -> Option<EventKind> {
    records_from(event, KINESIS_SOURCE).map(EventKind::Kinesis)
}

fn as_sqs(event: &Value) -> Option<EventKind> {
    records_from(event, SQS_SOURCE).map(EventKind::Sqs)
}

/// Classifies `event`; the first matching predicate wins.
#[must_use]
pub fn classify(event: Value) -> EventKind {
    PREDICATES
        .iter()
        .find_map(|predicate| predicate(&event))
        .unwrap_or(EventKind::Unrecognized(event))
}

/// Decodes `event` as a `Records` envelope when every record comes from `source`.
fn records_from<T>(event: &Value, source: &str) -> Option<T>
where
    T: for<'de> Deserialize<'de>,
{
    let records = event.get("Records")?.as_array()?;
    if records.is_empty() {
        return None;
    }
    let all_match = records.iter().all(|record| {
        record
            .get("eventSource")
            .or_else(|| record.get("EventSource"))
            .and_then(Value::as_str)
            == Some(source)
    });
    if !all_match {
        return None;
    }
    serde_json::from_value(event.clone()).ok()
}

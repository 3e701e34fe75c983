// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log objects written to S3 by AWS services.
//!
//! The service that wrote an object is recognised from its key, which also
//! names the source (load balancer, flow log, firewall, RDS instance, ...)
//! and the owning account.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use lazy_static::lazy_static;
use loki_push::labels::LabelSet;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, info};

use super::{gunzip, is_gzip, static_labels};
use crate::errors::Error;
use crate::event::{S3Event, S3EventRecord};
use crate::pipeline::Pipeline;
use crate::region_cache::RegionCache;

const FLOW_LOG_TYPE: &str = "vpcflowlogs";
const LB_LOG_TYPE: &str = "elasticloadbalancing";
const NETWORK_FIREWALL_LOG_TYPE: &str = "network-firewall";
const WAF_LOG_TYPE: &str = "waf";
const RDS_LOG_TYPE: &str = "rds";

lazy_static! {
    // bucket[/prefix]/AWSLogs/<account>/elasticloadbalancing/<region>/yyyy/mm/dd/<account>_elasticloadbalancing_<region>_app.<lb-name>.<id>_<end-time>_<ip>_<random>.log.gz
    // bucket[/prefix]/AWSLogs/<account>/vpcflowlogs/<region>/yyyy/mm/dd/<account>_vpcflowlogs_<region>_<flow-log-id>_<time>_<hash>.log.gz
    static ref LB_OR_FLOW_KEY: Regex = Regex::new(
        r"AWSLogs/(?P<account_id>\d+)/(?P<type>\w+)/(?P<region>[\w-]+)/(?P<year>\d+)/(?P<month>\d+)/(?P<day>\d+)/\d+_(?:elasticloadbalancing|vpcflowlogs)_\w+-\w+-\d_(?:(?:app|nlb|net)\.*?)?(?P<src>[a-zA-Z0-9\-]+)"
    )
    .expect("failed creating regex");
    static ref FIREWALL_KEY: Regex = Regex::new(
        r"(?P<log_type>\w+)/AWSLogs/(?P<account_id>\d+)/(?P<type>[\w-]+)/(?P<src>\w+)/(?P<region>[\w-]+)/(?P<firewall_name>[\w-]+)/(?P<year>\d+)/(?P<month>\d+)/(?P<day>\d+)/(?P<hour>\d+)/(?P<log_file>.*)"
    )
    .expect("failed creating regex");
    static ref RDS_KEY: Regex = Regex::new(
        r"(?P<rds_instance>.*)/(?P<log_type>.*)/year=(?P<year>\d+)/month=(?P<month>\d+)/day=(?P<day>\d+)/hour=(?P<hour>\d+)/(?P<src>.*)"
    )
    .expect("failed creating regex");
    static ref WAF_KEY: Regex = Regex::new(
        r"AWSLogs/year=(?P<year>\d+)/month=(?P<month>\d+)/day=(?P<day>\d+)/hour=(?P<hour>\d+)/(?P<src>.*)"
    )
    .expect("failed creating regex");
    static ref RFC3339_AFTER_WORD: Regex =
        Regex::new(r"\w+ (?P<timestamp>\d+-\d+-\d+T\d+:\d+:\d+\.\d+Z)")
            .expect("failed creating regex");
}

/// Reads log objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn fetch(&self, location: &ObjectLocation) -> Result<Vec<u8>, Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
    pub region: String,
    /// Account that must own the bucket for the request to succeed.
    pub expected_owner: Option<String>,
}

/// [`ObjectStore`] backed by one S3 client per bucket region.
#[derive(Default)]
pub struct S3ObjectStore {
    clients: RegionCache<aws_sdk_s3::Client>,
}

impl S3ObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, region: &str) -> Result<aws_sdk_s3::Client, Error> {
        self.clients
            .get_or_try_init(region, || async {
                debug!("S3 | Creating client for region '{region}'");
                let mut loader = aws_config::defaults(BehaviorVersion::latest());
                if !region.is_empty() {
                    loader = loader.region(Region::new(region.to_string()));
                }
                let config = loader.load().await;
                Ok(aws_sdk_s3::Client::new(&config))
            })
            .await
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn fetch(&self, location: &ObjectLocation) -> Result<Vec<u8>, Error> {
        let fetch_error = |message: String| Error::ObjectFetch {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            message,
        };

        let client = self.client(&location.region).await?;
        let output = client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .set_expected_bucket_owner(location.expected_owner.clone())
            .send()
            .await
            .map_err(|e| fetch_error(DisplayErrorContext(&e).to_string()))?;
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        Ok(body.into_bytes().to_vec())
    }
}

/// Fields known about one notified object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectLabels(HashMap<String, String>);

impl ObjectLabels {
    #[must_use]
    pub fn from_record(record: &S3EventRecord) -> Self {
        let bucket = &record.s3.bucket;
        let owner = &bucket.owner_identity.principal_id;
        let key = percent_decode_str(&record.s3.object.key)
            .decode_utf8()
            .map_or_else(|_| record.s3.object.key.clone(), Cow::into_owned);

        let mut labels = HashMap::from([
            ("bucket".to_string(), bucket.name.clone()),
            ("bucket_owner".to_string(), owner.clone()),
            ("bucket_region".to_string(), record.aws_region.clone()),
        ]);

        capture_into(&LB_OR_FLOW_KEY, &key, &mut labels);
        capture_into(&FIREWALL_KEY, &key, &mut labels);
        if capture_into(&RDS_KEY, &key, &mut labels) {
            labels.insert("type".to_string(), RDS_LOG_TYPE.to_string());
            labels.insert("src".to_string(), bucket.name.clone());
            labels.insert("account_id".to_string(), owner.clone());
        }
        if capture_into(&WAF_KEY, &key, &mut labels) {
            labels.insert("type".to_string(), WAF_LOG_TYPE.to_string());
            labels.insert("src".to_string(), bucket.name.clone());
            labels.insert("account_id".to_string(), owner.clone());
        }
        labels.insert("key".to_string(), key);
        ObjectLabels(labels)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> &str {
        self.0.get(name).map_or("", String::as_str)
    }

    #[must_use]
    pub fn location(&self) -> ObjectLocation {
        let owner = self.get("bucket_owner");
        let is_account_id = owner.len() == 12 && owner.bytes().all(|b| b.is_ascii_digit());
        ObjectLocation {
            bucket: self.get("bucket").to_string(),
            key: self.get("key").to_string(),
            region: self.get("bucket_region").to_string(),
            expected_owner: is_account_id.then(|| owner.to_string()),
        }
    }

    /// Value of `__aws_log_type` for this object.
    #[must_use]
    pub fn log_type(&self) -> String {
        match self.get("type") {
            FLOW_LOG_TYPE => "s3_vpc_flow".to_string(),
            LB_LOG_TYPE => "s3_lb".to_string(),
            RDS_LOG_TYPE => format!("s3_rds_{}", self.get("log_type")),
            WAF_LOG_TYPE => "s3_waf".to_string(),
            NETWORK_FIREWALL_LOG_TYPE => "s3_network_firewall".to_string(),
            _ => "s3".to_string(),
        }
    }

    #[must_use]
    pub fn stream_labels(&self) -> LabelSet {
        let log_type = self.log_type();
        static_labels([
            ("__aws_log_type".to_string(), log_type.clone()),
            (format!("__aws_{log_type}"), self.get("src").to_string()),
            (
                format!("__aws_{log_type}_owner"),
                self.get("account_id").to_string(),
            ),
        ])
    }

    fn skips_header(&self) -> bool {
        self.get("type") == FLOW_LOG_TYPE
    }

    fn is_compressed(&self) -> bool {
        self.get("key").contains("gz")
    }

    fn timestamp_source(&self) -> TimestampSource {
        match self.get("type") {
            RDS_LOG_TYPE => TimestampSource::Rds {
                audit: self.get("log_type").contains("audit"),
            },
            WAF_LOG_TYPE => TimestampSource::Waf,
            NETWORK_FIREWALL_LOG_TYPE => TimestampSource::NetworkFirewall,
            _ => TimestampSource::Text,
        }
    }
}

fn capture_into(regex: &Regex, key: &str, labels: &mut HashMap<String, String>) -> bool {
    let Some(captures) = regex.captures(key) else {
        return false;
    };
    for name in regex.capture_names().flatten() {
        if let Some(value) = captures.name(name) {
            labels.insert(name.to_string(), value.as_str().to_string());
        }
    }
    true
}

/// Where the timestamp of a line comes from, besides an RFC 3339 token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimestampSource {
    Text,
    Rds { audit: bool },
    Waf,
    NetworkFirewall,
}

/// Timestamps of consecutive lines. A line without a usable timestamp gets
/// the one of the previous line.
#[derive(Debug)]
struct LineTimestamps {
    source: TimestampSource,
    last: OffsetDateTime,
}

impl LineTimestamps {
    fn new(source: TimestampSource, start: OffsetDateTime) -> Self {
        LineTimestamps {
            source,
            last: start,
        }
    }

    fn observe(&mut self, line: &str) -> OffsetDateTime {
        if let Some(timestamp) = self.extract(line) {
            self.last = timestamp;
        }
        self.last
    }

    fn extract(&self, line: &str) -> Option<OffsetDateTime> {
        let specific = match self.source {
            TimestampSource::Text => None,
            TimestampSource::Rds { audit } => rds_general_timestamp(line)
                .or_else(|| audit.then(|| rds_audit_timestamp(line)).flatten()),
            TimestampSource::Waf => json_integer(line, "timestamp").and_then(|ms| {
                OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
            }),
            TimestampSource::NetworkFirewall => json_integer(line, "event_timestamp")
                .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok()),
        };
        specific.or_else(|| rfc3339_timestamp(line))
    }
}

fn rfc3339_timestamp(line: &str) -> Option<OffsetDateTime> {
    let captures = RFC3339_AFTER_WORD.captures(line)?;
    OffsetDateTime::parse(captures.name("timestamp")?.as_str(), &Rfc3339).ok()
}

/// `2023-04-07T08:05:00.123456Z ...`
fn rds_general_timestamp(line: &str) -> Option<OffsetDateTime> {
    let token = line.split(' ').next()?;
    let format = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
    );
    PrimitiveDateTime::parse(token, format)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// `1680854700123456,instance,user,...`: epoch microseconds, kept to the second.
fn rds_audit_timestamp(line: &str) -> Option<OffsetDateTime> {
    let field = line.split(',').next()?;
    let seconds = field.get(..field.len().checked_sub(6)?)?;
    OffsetDateTime::from_unix_timestamp(seconds.parse().ok()?).ok()
}

/// Integer field of a JSON line, written either as a number or a string.
fn json_integer(line: &str, field: &str) -> Option<i64> {
    let document: Value = serde_json::from_str(line).ok()?;
    match document.get(field)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Fetches every object of `event` and processes its lines.
pub async fn process(
    event: &S3Event,
    store: &dyn ObjectStore,
    pipeline: &mut Pipeline<'_>,
) -> Result<(), Error> {
    for record in &event.records {
        let object = ObjectLabels::from_record(record);
        let location = object.location();
        info!(
            "S3 | Fetching s3://{}/{}",
            location.bucket, location.key
        );
        let body = store.fetch(&location).await?;
        process_object(&object, &body, pipeline).await?;
    }
    Ok(())
}

/// Processes the contents of one object.
pub async fn process_object(
    object: &ObjectLabels,
    body: &[u8],
    pipeline: &mut Pipeline<'_>,
) -> Result<(), Error> {
    let data = if object.is_compressed() && is_gzip(body) {
        Cow::Owned(gunzip(body, object.get("key"))?)
    } else {
        Cow::Borrowed(body)
    };
    let text = String::from_utf8_lossy(&data);

    let labels = object.stream_labels();
    let mut timestamps =
        LineTimestamps::new(object.timestamp_source(), OffsetDateTime::now_utc());
    for (n, line) in text.lines().enumerate() {
        if n == 0 && object.skips_header() {
            continue;
        }
        let timestamp = timestamps.observe(line);
        pipeline.process(&labels, line.to_string(), timestamp).await?;
    }
    Ok(())
}

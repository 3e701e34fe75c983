// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use lambda_promtail::{
    adapters::s3::{ObjectLocation, ObjectStore},
    config::Config,
    errors::Error,
    geoip::NoopAnnotator,
    handler::Handler,
};
use loki_push::{flusher::Flusher, loki::DeliveryError, push::PushRequest};
use mockito::{Matcher, Server};
use prost::Message;
use serde_json::json;
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

const PUSH_PATH: &str = "/loki/api/v1/push";

struct StaticStore(Vec<u8>);

#[async_trait]
impl ObjectStore for StaticStore {
    async fn fetch(&self, _location: &ObjectLocation) -> Result<Vec<u8>, Error> {
        Ok(self.0.clone())
    }
}

fn config(server: &Server) -> Config {
    let vars: HashMap<&str, String> = HashMap::from([
        ("WRITE_ADDRESS", format!("{}{PUSH_PATH}", server.url())),
        ("TENANT_ID", "team-a".to_string()),
        ("EXTRA_LABELS", "env,prod".to_string()),
        ("PRINT_LOG_LINE", "false".to_string()),
        ("MAX_RETRIES", "2".to_string()),
        ("MIN_BACKOFF_MS", "1".to_string()),
        ("MAX_BACKOFF_MS", "5".to_string()),
    ]);
    Config::from_lookup(|name| vars.get(name).cloned()).expect("valid configuration")
}

fn handler(config: &Config, object: Vec<u8>) -> Handler {
    let flusher = Flusher::new(config.flusher_config()).expect("failed to build flusher");
    Handler::new(
        config.pipeline_settings(),
        Box::new(flusher),
        Box::new(NoopAnnotator),
        Box::new(StaticStore(object)),
    )
}

fn decode(body: &[u8]) -> Option<PushRequest> {
    let raw = snap::raw::Decoder::new().decompress_vec(body).ok()?;
    PushRequest::decode(raw.as_slice()).ok()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

#[tokio::test]
async fn unrecognized_event_is_shipped_as_one_line() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", PUSH_PATH)
        .match_header("x-scope-orgid", "team-a")
        .match_header("authorization", Matcher::Missing)
        .match_request(|request| {
            let Some(push) = request.body().ok().and_then(|body| decode(body)) else {
                return false;
            };
            push.streams.len() == 1
                && push.streams[0].labels
                    == r#"{__extra_env="prod", detail__state="running", source="aws.ec2"}"#
                && push.streams[0].entries.len() == 1
        })
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let config = config(&server);
    handler(&config, Vec::new())
        .handle(json!({"source": "aws.ec2", "detail": {"state": "running"}}))
        .await
        .expect("invocation succeeds");

    mock.assert_async().await;
}

#[tokio::test]
async fn cloudwatch_subscription_is_shipped() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", PUSH_PATH)
        .match_request(|request| {
            let Some(push) = request.body().ok().and_then(|body| decode(body)) else {
                return false;
            };
            // Entries are grouped by stream in order of first appearance.
            let lines: Vec<&str> = push
                .streams
                .iter()
                .flat_map(|stream| stream.entries.iter().map(|entry| entry.line.as_str()))
                .collect();
            push.streams.iter().all(|stream| {
                stream
                    .labels
                    .contains(r#"__aws_cloudwatch_log_group="/aws/lambda/orders""#)
            }) && lines == ["START", "END", r#"{"status":500}"#]
        })
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let payload = json!({
        "messageType": "DATA_MESSAGE",
        "owner": "123456789012",
        "logGroup": "/aws/lambda/orders",
        "logStream": "stream-1",
        "logEvents": [
            {"id": "1", "timestamp": 1_700_000_000_000_i64, "message": "START"},
            {"id": "2", "timestamp": 1_700_000_000_100_i64, "message": "{\"status\":500}"},
            {"id": "3", "timestamp": 1_700_000_000_200_i64, "message": "END"}
        ]
    });
    let event = json!({"awslogs": {"data": STANDARD.encode(gzip(payload.to_string().as_bytes()))}});

    let config = config(&server);
    handler(&config, Vec::new())
        .handle(event)
        .await
        .expect("invocation succeeds");

    mock.assert_async().await;
}

#[tokio::test]
async fn s3_notification_through_sqs_is_shipped() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", PUSH_PATH)
        .match_request(|request| {
            let Some(push) = request.body().ok().and_then(|body| decode(body)) else {
                return false;
            };
            push.streams.len() == 1
                && push.streams[0].labels
                    == r#"{__aws_log_type="s3_lb", __aws_s3_lb="my-lb", __aws_s3_lb_owner="123456789012", __extra_env="prod"}"#
                && push.streams[0].entries.len() == 2
        })
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let notification = json!({"Records": [{
        "eventSource": "aws:s3",
        "awsRegion": "us-east-1",
        "s3": {
            "bucket": {"name": "elb-logs", "ownerIdentity": {"principalId": "A3NL1KOZZKExample"}},
            "object": {"key": "AWSLogs/123456789012/elasticloadbalancing/us-east-1/2023/11/14/123456789012_elasticloadbalancing_us-east-1_app.my-lb.1a2b3c_20231114T2210Z_10.0.0.1_abc.log.gz"}
        }
    }]});
    let event = json!({"Records": [{
        "messageId": "m-1",
        "eventSource": "aws:sqs",
        "eventSourceARN": "arn:aws:sqs:us-east-1:123456789012:elb-logs",
        "body": notification.to_string()
    }]});
    let object = gzip(
        b"https 2023-11-14T22:13:20.000000Z app/my-lb/1a2b 10.0.0.9:443 200\n\
          https 2023-11-14T22:13:21.000000Z app/my-lb/1a2b 10.0.0.9:443 404\n",
    );

    let config = config(&server);
    handler(&config, object)
        .handle(event)
        .await
        .expect("invocation succeeds");

    mock.assert_async().await;
}

#[tokio::test]
async fn delivery_failure_fails_the_invocation() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", PUSH_PATH)
        .with_status(503)
        .with_body("ingester unavailable")
        .expect(2)
        .create_async()
        .await;

    let config = config(&server);
    let err = handler(&config, Vec::new())
        .handle(json!({"source": "aws.ec2"}))
        .await
        .expect_err("delivery fails");

    assert!(matches!(
        err,
        Error::Delivery(DeliveryError::Exhausted { attempts: 2, .. })
    ));
    mock.assert_async().await;
}

#[tokio::test]
async fn elapsed_deadline_fails_the_invocation() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", PUSH_PATH)
        .with_status(204)
        .expect_at_most(1)
        .create_async()
        .await;

    let config = config(&server);
    let err = handler(&config, Vec::new())
        .handle_with_deadline(json!({"source": "aws.ec2"}), Some(Duration::ZERO))
        .await
        .expect_err("deadline elapses");

    assert!(matches!(err, Error::Timeout(budget) if budget == Duration::ZERO));
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use loki_push::labels::LabelError;
use loki_push::loki::DeliveryError;
use std::time::Duration;
use thiserror::Error;

/// Fatal startup error. The function exits before serving any event.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable WRITE_ADDRESS not present, format: https://<hostname>/loki/api/v1/push")]
    MissingWriteAddress,
    #[error("invalid WRITE_ADDRESS '{value}': {source}")]
    InvalidWriteAddress {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("both USERNAME and PASSWORD must be set if either one is set")]
    PartialBasicAuth,
    #[error("USERNAME/PASSWORD and BEARER_TOKEN are mutually exclusive")]
    ConflictingAuth,
    #[error("invalid value '{value}' for {name}: expected a positive integer")]
    InvalidNumber { name: &'static str, value: String },
    #[error("invalid value for EXTRA_LABELS: expected a comma separated list with an even number of entries")]
    OddExtraLabels,
    #[error("invalid EXTRA_LABELS: {0}")]
    InvalidExtraLabel(#[from] LabelError),
    #[error("failed to open GeoIP database '{path}': {message}")]
    GeoIp { path: String, message: String },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Failure of one invocation. Reported to the Lambda runtime so the
/// platform's own retry and dead-letter policy applies.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to decode {kind} event: {message}")]
    Decode { kind: &'static str, message: String },
    #[error("failed to fetch s3://{bucket}/{key}: {message}")]
    ObjectFetch {
        bucket: String,
        key: String,
        message: String,
    },
    #[error("failed to decompress {what}: {source}")]
    Decompress {
        what: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error("invocation deadline elapsed after {0:?}")]
    Timeout(Duration),
}

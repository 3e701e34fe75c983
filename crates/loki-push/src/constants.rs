// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Limits and protocol constants of the push pipeline.
//!
//! # Label cardinality
//!
//! Every distinct label set is a distinct stream on the backend, so the
//! flattening engine refuses to turn very long values or very deep paths
//! into labels:
//! - **Value length**: [`MAX_LABEL_VALUE_LEN`] characters
//! - **Path length**: [`MAX_LABEL_PATH_LEN`] characters, before sanitization
//!
//! # Batching
//!
//! A batch is delivered as soon as its estimated wire size reaches the
//! configured threshold ([`DEFAULT_BATCH_SIZE_BYTES`] unless overridden).
//! The estimate deliberately over-counts (see [`ENTRY_OVERHEAD_BYTES`] and
//! [`STREAM_OVERHEAD_BYTES`]) so the real frames stay below the threshold.

use std::time::Duration;

/// Maximum length, in characters, of a flattened label value.
///
/// Longer values (request bodies, stack traces) are dropped entirely rather
/// than truncated.
pub const MAX_LABEL_VALUE_LEN: usize = 6048;

/// Maximum length, in characters, of a flattened label path.
pub const MAX_LABEL_PATH_LEN: usize = 1024;

/// Default auto-flush threshold of a batch, in bytes.
///
/// # Value: 128KiB (131,072 bytes)
pub const DEFAULT_BATCH_SIZE_BYTES: usize = 128 * 1024;

/// Estimated protobuf cost of one entry besides its line.
///
/// Covers the entry tag and length prefix, the timestamp message (seconds
/// and nanos varints) and the line tag and length prefix.
pub const ENTRY_OVERHEAD_BYTES: usize = 32;

/// Estimated protobuf cost of one stream besides its label string.
///
/// The label string itself is counted at its rendered length, which already
/// includes the per-label punctuation.
pub const STREAM_OVERHEAD_BYTES: usize = 16;

pub const CONTENT_TYPE: &str = "application/x-protobuf";
pub const CONTENT_ENCODING: &str = "snappy";
pub const USER_AGENT: &str = "lambda-promtail";

/// Header carrying the tenant identifier.
pub const TENANT_HEADER: &str = "X-Scope-OrgID";

/// Maximum number of response body bytes quoted in an error message.
pub const MAX_ERROR_BODY_LEN: usize = 1024;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Default number of delivery attempts for one batch, first attempt included.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

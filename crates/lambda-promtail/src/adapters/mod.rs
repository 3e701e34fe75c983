// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Source adapters. Each one turns a classified event into log lines, their
//! static labels and timestamps, and hands them to the [`Pipeline`].
//!
//! [`Pipeline`]: crate::pipeline::Pipeline

use flate2::read::MultiGzDecoder;
use loki_push::labels::{LabelName, LabelSet};
use std::io::Read;

use crate::errors::Error;

pub mod cloudwatch;
pub mod generic;
pub mod kinesis;
pub mod s3;
pub mod sqs;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[must_use]
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// Decompresses every gzip member of `data`.
pub fn gunzip(data: &[u8], what: &str) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(data.len() * 4);
    MultiGzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|source| Error::Decompress {
            what: what.to_string(),
            source,
        })?;
    Ok(out)
}

/// Builds adapter labels. Names are sanitized since some of them embed
/// values taken from the event; pairs whose name is empty are dropped.
pub fn static_labels<N, V, I>(pairs: I) -> LabelSet
where
    N: AsRef<str>,
    V: Into<String>,
    I: IntoIterator<Item = (N, V)>,
{
    pairs
        .into_iter()
        .filter_map(|(name, value)| {
            LabelName::sanitize(name.as_ref()).map(|name| (name, value.into()))
        })
        .collect()
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Loki push
//!
//! Turns log lines into labelled streams and delivers them to a Loki
//! compatible push endpoint.
//!
//! - [`flatten`]: structured log lines to label sets
//! - [`labels`]: label names, label sets and stream keys
//! - [`aggregator`]: grouping of entries into size-bounded batches
//! - [`push`]: protobuf and snappy wire encoding
//! - [`loki`] and [`flusher`]: HTTP delivery with retries

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregator;
pub mod constants;
pub mod flatten;
pub mod flusher;
pub mod labels;
pub mod loki;
pub mod push;

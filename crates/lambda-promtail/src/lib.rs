// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lambda function shipping AWS log events to a Loki compatible endpoint.
//!
//! Every invocation classifies its event, lets the matching adapter turn it
//! into labelled lines and delivers them through [`loki_push`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod adapters;
pub mod config;
pub mod errors;
pub mod event;
pub mod geoip;
pub mod handler;
pub mod pipeline;
pub mod region_cache;

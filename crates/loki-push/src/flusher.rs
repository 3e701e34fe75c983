// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

use crate::aggregator::{Batch, PushSink};
use crate::constants::DEFAULT_TIMEOUT;
use crate::loki::{DeliveryError, LokiApi, PushEndpoint, RetryStrategy};
use crate::push;

pub struct FlusherConfig {
    pub endpoint: PushEndpoint,
    pub timeout: Duration,
    pub retry_strategy: RetryStrategy,
    pub skip_tls_verify: bool,
}

impl FlusherConfig {
    #[must_use]
    pub fn new(endpoint: PushEndpoint) -> Self {
        FlusherConfig {
            endpoint,
            timeout: DEFAULT_TIMEOUT,
            retry_strategy: RetryStrategy::default(),
            skip_tls_verify: false,
        }
    }
}

/// Encodes batches and ships them to the push endpoint.
#[derive(Debug, Clone)]
pub struct Flusher {
    api: LokiApi,
}

impl Flusher {
    pub fn new(config: FlusherConfig) -> Result<Self, reqwest::Error> {
        let api = LokiApi::new(
            config.endpoint,
            config.timeout,
            config.skip_tls_verify,
            config.retry_strategy,
        )?;
        Ok(Flusher { api })
    }

    #[must_use]
    pub fn api(&self) -> &LokiApi {
        &self.api
    }
}

#[async_trait]
impl PushSink for Flusher {
    async fn push(&self, batch: &Batch) -> Result<(), DeliveryError> {
        if batch.is_empty() {
            return Ok(());
        }
        let body = push::encode(batch).map_err(|e| DeliveryError::Encode(e.to_string()))?;
        debug!(
            "PUSH | Flushing {} entries in {} streams ({} bytes compressed)",
            batch.entry_count(),
            batch.streams().len(),
            body.len()
        );
        self.api.ship(Bytes::from(body)).await
    }
}

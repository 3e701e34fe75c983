// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery to the push endpoint.
//!
//! Every attempt ends in one of three states:
//!
//! ```text
//!   Attempting ──2xx──────────────────────────> Success
//!       │
//!       ├──429 / 5xx / network / timeout──> Retryable ──backoff──> Attempting
//!       │                                       │
//!       │                                       └─attempts exhausted─> DeliveryError::Exhausted
//!       │
//!       └──other status / bad request─────> Fatal ───────────────> DeliveryError::Fatal
//! ```

use bytes::Bytes;
use reqwest::{header, StatusCode};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::constants::{
    CONTENT_ENCODING, CONTENT_TYPE, DEFAULT_MAX_BACKOFF, DEFAULT_MAX_RETRIES, DEFAULT_MIN_BACKOFF,
    MAX_ERROR_BODY_LEN, TENANT_HEADER, USER_AGENT,
};

/// Terminal failure of a batch delivery.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to encode push request: {0}")]
    Encode(String),
    #[error("push rejected (status {status:?}): {message}")]
    Fatal {
        status: Option<u16>,
        message: String,
    },
    #[error("push failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Outcome of a single failed attempt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShippingError {
    #[error("retryable failure (status {status:?}): {message}")]
    Retryable {
        status: Option<u16>,
        message: String,
    },
    #[error("fatal failure (status {status:?}): {message}")]
    Fatal {
        status: Option<u16>,
        message: String,
    },
}

/// Whether a non-success status is worth retrying.
#[must_use]
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    None,
    Basic { username: String, password: String },
    Bearer(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::None => write!(f, "None"),
            Credentials::Basic { username, .. } => write!(f, "Basic({username}, ***)"),
            Credentials::Bearer(_) => write!(f, "Bearer(***)"),
        }
    }
}

/// Where and as whom batches are pushed.
#[derive(Debug, Clone)]
pub struct PushEndpoint {
    pub url: Url,
    pub credentials: Credentials,
    pub tenant_id: Option<String>,
}

impl PushEndpoint {
    #[must_use]
    pub fn new(url: Url) -> Self {
        PushEndpoint {
            url,
            credentials: Credentials::None,
            tenant_id: None,
        }
    }
}

/// Delay schedule between attempts. The first field of every variant is
/// the total number of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    Immediate(u32),
    /// Attempts and a fixed delay in milliseconds.
    LinearBackoff(u32, u64),
    /// Doubling delay starting at `min`, capped at `max`.
    ExponentialBackoff {
        attempts: u32,
        min: Duration,
        max: Duration,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::ExponentialBackoff {
            attempts: DEFAULT_MAX_RETRIES,
            min: DEFAULT_MIN_BACKOFF,
            max: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryStrategy {
    /// Total number of attempts, never less than one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        let attempts = match self {
            RetryStrategy::Immediate(attempts)
            | RetryStrategy::LinearBackoff(attempts, _)
            | RetryStrategy::ExponentialBackoff { attempts, .. } => *attempts,
        };
        attempts.max(1)
    }

    /// Delay before the attempt following the `attempt`-th failure (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, delay_ms) => Duration::from_millis(*delay_ms),
            RetryStrategy::ExponentialBackoff { min, max, .. } => {
                let exponent = attempt.saturating_sub(1).min(31);
                min.saturating_mul(1 << exponent).min(*max)
            }
        }
    }
}

/// Client for one push endpoint.
#[derive(Debug, Clone)]
pub struct LokiApi {
    client: reqwest::Client,
    endpoint: PushEndpoint,
    retry_strategy: RetryStrategy,
}

impl LokiApi {
    pub fn new(
        endpoint: PushEndpoint,
        timeout: Duration,
        skip_tls_verify: bool,
        retry_strategy: RetryStrategy,
    ) -> Result<Self, reqwest::Error> {
        let client = build_client(timeout, skip_tls_verify)?;
        Ok(LokiApi {
            client,
            endpoint,
            retry_strategy,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &PushEndpoint {
        &self.endpoint
    }

    /// Sends `payload`, retrying retryable failures according to the
    /// retry strategy.
    pub async fn ship(&self, payload: Bytes) -> Result<(), DeliveryError> {
        let max_attempts = self.retry_strategy.max_attempts();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let time = Instant::now();
            let result = self.send(payload.clone()).await;
            let elapsed = time.elapsed();

            match result {
                Ok(()) => {
                    debug!(
                        "PUSH | Sent {} bytes in {} ms (attempt {attempts})",
                        payload.len(),
                        elapsed.as_millis()
                    );
                    return Ok(());
                }
                Err(ShippingError::Fatal { status, message }) => {
                    error!("PUSH | Push rejected, not retrying: {message}");
                    return Err(DeliveryError::Fatal { status, message });
                }
                Err(ShippingError::Retryable { message, .. }) => {
                    if attempts >= max_attempts {
                        error!("PUSH | Failed to send batch after {attempts} attempts: {message}");
                        return Err(DeliveryError::Exhausted {
                            attempts,
                            last: message,
                        });
                    }
                    let delay = self.retry_strategy.delay(attempts);
                    warn!(
                        "PUSH | Error sending batch, will retry in {} ms: {message}",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One attempt, classified.
    async fn send(&self, payload: Bytes) -> Result<(), ShippingError> {
        let mut request = self
            .client
            .post(self.endpoint.url.clone())
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .header(header::CONTENT_ENCODING, CONTENT_ENCODING)
            .header(header::USER_AGENT, USER_AGENT)
            .body(payload);

        if let Some(tenant_id) = &self.endpoint.tenant_id {
            request = request.header(TENANT_HEADER, tenant_id);
        }
        request = match &self.endpoint.credentials {
            Credentials::None => request,
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            Credentials::Bearer(token) => request.bearer_auth(token),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Err(ShippingError::Fatal {
                    status: None,
                    message: format!("invalid request: {e}"),
                })
            }
            Err(e) => {
                return Err(ShippingError::Retryable {
                    status: None,
                    message: e.to_string(),
                })
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.bytes().await.unwrap_or_default();
        let body = String::from_utf8_lossy(&body[..body.len().min(MAX_ERROR_BODY_LEN)]);
        let message = format!("server returned HTTP status {status}: {}", body.trim());
        let retryable = is_retryable_status(status);
        let status = Some(status.as_u16());
        if retryable {
            Err(ShippingError::Retryable { status, message })
        } else {
            Err(ShippingError::Fatal { status, message })
        }
    }
}

fn build_client(
    timeout: Duration,
    skip_tls_verify: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if skip_tls_verify {
        warn!("PUSH | TLS certificate verification is disabled for the push endpoint");
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build()
}

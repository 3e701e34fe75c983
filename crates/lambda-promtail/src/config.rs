// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use loki_push::constants::{
    DEFAULT_BATCH_SIZE_BYTES, DEFAULT_MAX_BACKOFF, DEFAULT_MAX_RETRIES, DEFAULT_MIN_BACKOFF,
    DEFAULT_TIMEOUT,
};
use loki_push::flusher::FlusherConfig;
use loki_push::labels::{LabelName, LabelSet};
use loki_push::loki::{Credentials, PushEndpoint, RetryStrategy};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::errors::ConfigError;
use crate::pipeline::PipelineSettings;

const EXTRA_LABELS_PREFIX: &str = "__extra_";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone)]
pub struct Config {
    pub write_address: Url,
    /// Auto-flush threshold of a batch, in bytes.
    pub batch_size: usize,
    pub credentials: Credentials,
    pub tenant_id: Option<String>,
    pub skip_tls_verify: bool,
    pub extra_labels: LabelSet,
    /// Keep the CloudWatch log stream as a label.
    pub keep_stream: bool,
    /// Echo every shipped line to the function's own log.
    pub print_log_line: bool,
    pub geoip_db_path: Option<PathBuf>,
    pub http_timeout: Duration,
    pub retry_strategy: RetryStrategy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let address = var("WRITE_ADDRESS").ok_or(ConfigError::MissingWriteAddress)?;
        let write_address =
            Url::parse(&address).map_err(|source| ConfigError::InvalidWriteAddress {
                value: address.clone(),
                source,
            })?;

        let credentials = parse_credentials(
            var("USERNAME"),
            var("PASSWORD"),
            var("BEARER_TOKEN"),
        )?;

        let extra_labels = parse_extra_labels(
            var("EXTRA_LABELS").as_deref().unwrap_or_default(),
            is_true(var("OMIT_EXTRA_LABELS_PREFIX").as_deref()),
        )?;

        let batch_size = parse_positive("BATCH_SIZE", var("BATCH_SIZE"))?
            .map_or(DEFAULT_BATCH_SIZE_BYTES, |size| {
                usize::try_from(size).unwrap_or(usize::MAX)
            });

        let http_timeout = parse_positive("HTTP_TIMEOUT_MS", var("HTTP_TIMEOUT_MS"))?
            .map_or(DEFAULT_TIMEOUT, Duration::from_millis);
        let min_backoff = parse_positive("MIN_BACKOFF_MS", var("MIN_BACKOFF_MS"))?
            .map_or(DEFAULT_MIN_BACKOFF, Duration::from_millis);
        let max_backoff = parse_positive("MAX_BACKOFF_MS", var("MAX_BACKOFF_MS"))?
            .map_or(DEFAULT_MAX_BACKOFF, Duration::from_millis);
        let attempts = parse_positive("MAX_RETRIES", var("MAX_RETRIES"))?
            .map_or(DEFAULT_MAX_RETRIES, |n| u32::try_from(n).unwrap_or(u32::MAX));

        Ok(Config {
            write_address,
            batch_size,
            credentials,
            tenant_id: var("TENANT_ID"),
            skip_tls_verify: is_true(var("SKIP_TLS_VERIFY").as_deref()),
            extra_labels,
            keep_stream: is_true(var("KEEP_STREAM").as_deref()),
            print_log_line: !var("PRINT_LOG_LINE")
                .is_some_and(|value| value.eq_ignore_ascii_case("false")),
            geoip_db_path: var("GEOIP_DB_PATH").map(PathBuf::from),
            http_timeout,
            retry_strategy: RetryStrategy::ExponentialBackoff {
                attempts,
                min: min_backoff,
                max: max_backoff.max(min_backoff),
            },
        })
    }

    #[must_use]
    pub fn flusher_config(&self) -> FlusherConfig {
        FlusherConfig {
            endpoint: PushEndpoint {
                url: self.write_address.clone(),
                credentials: self.credentials.clone(),
                tenant_id: self.tenant_id.clone(),
            },
            timeout: self.http_timeout,
            retry_strategy: self.retry_strategy.clone(),
            skip_tls_verify: self.skip_tls_verify,
        }
    }

    #[must_use]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            extra_labels: self.extra_labels.clone(),
            batch_size: self.batch_size,
            keep_stream: self.keep_stream,
            print_log_line: self.print_log_line,
        }
    }
}

fn parse_credentials(
    username: Option<String>,
    password: Option<String>,
    bearer_token: Option<String>,
) -> Result<Credentials, ConfigError> {
    match (username, password, bearer_token) {
        (Some(_), None, _) | (None, Some(_), _) => Err(ConfigError::PartialBasicAuth),
        (Some(_), Some(_), Some(_)) => Err(ConfigError::ConflictingAuth),
        (Some(username), Some(password), None) => Ok(Credentials::Basic { username, password }),
        (None, None, Some(token)) => Ok(Credentials::Bearer(token)),
        (None, None, None) => Ok(Credentials::None),
    }
}

/// Parses `name1,value1,name2,value2`. Names get the `__extra_` prefix
/// unless `omit_prefix` is set, and are validated, never rewritten.
pub fn parse_extra_labels(raw: &str, omit_prefix: bool) -> Result<LabelSet, ConfigError> {
    if raw.is_empty() {
        return Ok(LabelSet::new());
    }
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() % 2 != 0 {
        return Err(ConfigError::OddExtraLabels);
    }
    let prefix = if omit_prefix { "" } else { EXTRA_LABELS_PREFIX };

    let mut labels = LabelSet::new();
    for pair in parts.chunks_exact(2) {
        let name = LabelName::parse(&format!("{prefix}{}", pair[0]))?;
        labels.insert(name, pair[1]);
    }
    Ok(labels)
}

fn parse_positive(name: &'static str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ConfigError::InvalidNumber { name, value }),
    }
}

/// Anything other than a case-insensitive `true` is false.
/// Tracing filter for the `LOG_LEVEL` value, with the transport crates silenced.
#[must_use]
pub fn log_filter(level: Option<&str>) -> String {
    let level = level.map_or_else(|| DEFAULT_LOG_LEVEL.to_string(), str::to_lowercase);
    format!("h2=off,hyper=off,rustls=off,aws_smithy_runtime=off,{level}")
}

fn is_true(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    const ADDRESS: (&str, &str) = ("WRITE_ADDRESS", "https://loki.example.com/loki/api/v1/push");

    #[test]
    fn defaults() {
        let config = config_from(&[ADDRESS]).unwrap();
        assert_eq!(config.batch_size, 131_072);
        assert_eq!(config.credentials, Credentials::None);
        assert!(config.tenant_id.is_none());
        assert!(!config.skip_tls_verify);
        assert!(config.extra_labels.is_empty());
        assert!(!config.keep_stream);
        assert!(config.print_log_line);
        assert!(config.geoip_db_path.is_none());
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(
            config.retry_strategy,
            RetryStrategy::ExponentialBackoff {
                attempts: 10,
                min: Duration::from_millis(100),
                max: Duration::from_secs(30),
            }
        );
    }

    #[test]
    fn write_address_is_required_and_must_parse() {
        assert!(matches!(
            config_from(&[]),
            Err(ConfigError::MissingWriteAddress)
        ));
        assert!(matches!(
            config_from(&[("WRITE_ADDRESS", "")]),
            Err(ConfigError::MissingWriteAddress)
        ));
        assert!(matches!(
            config_from(&[("WRITE_ADDRESS", "not a url")]),
            Err(ConfigError::InvalidWriteAddress { .. })
        ));
    }

    #[test]
    fn basic_auth_needs_both_halves() {
        assert!(matches!(
            config_from(&[ADDRESS, ("USERNAME", "user")]),
            Err(ConfigError::PartialBasicAuth)
        ));
        assert!(matches!(
            config_from(&[ADDRESS, ("PASSWORD", "pass")]),
            Err(ConfigError::PartialBasicAuth)
        ));
        let config = config_from(&[ADDRESS, ("USERNAME", "user"), ("PASSWORD", "pass")]).unwrap();
        assert_eq!(
            config.credentials,
            Credentials::Basic {
                username: "user".to_string(),
                password: "pass".to_string()
            }
        );
    }

    #[test]
    fn basic_auth_and_bearer_token_conflict() {
        assert!(matches!(
            config_from(&[
                ADDRESS,
                ("USERNAME", "user"),
                ("PASSWORD", "pass"),
                ("BEARER_TOKEN", "token"),
            ]),
            Err(ConfigError::ConflictingAuth)
        ));
        let config = config_from(&[ADDRESS, ("BEARER_TOKEN", "token")]).unwrap();
        assert_eq!(config.credentials, Credentials::Bearer("token".to_string()));
    }

    #[test]
    fn log_filter_from_level() {
        assert_eq!(
            log_filter(None),
            "h2=off,hyper=off,rustls=off,aws_smithy_runtime=off,info"
        );
        assert!(log_filter(Some("DEBUG")).ends_with(",debug"));
    }

    #[test]
    fn flags() {
        let config = config_from(&[
            ADDRESS,
            ("SKIP_TLS_VERIFY", "TRUE"),
            ("KEEP_STREAM", "true"),
            ("PRINT_LOG_LINE", "False"),
        ])
        .unwrap();
        assert!(config.skip_tls_verify);
        assert!(config.keep_stream);
        assert!(!config.print_log_line);

        let config = config_from(&[ADDRESS, ("KEEP_STREAM", "yes"), ("PRINT_LOG_LINE", "no")])
            .unwrap();
        assert!(!config.keep_stream);
        assert!(config.print_log_line);
    }

    #[test]
    fn numeric_settings() {
        let config = config_from(&[
            ADDRESS,
            ("BATCH_SIZE", "1024"),
            ("HTTP_TIMEOUT_MS", "250"),
            ("MIN_BACKOFF_MS", "10"),
            ("MAX_BACKOFF_MS", "20"),
            ("MAX_RETRIES", "3"),
        ])
        .unwrap();
        assert_eq!(config.batch_size, 1024);
        assert_eq!(config.http_timeout, Duration::from_millis(250));
        assert_eq!(config.retry_strategy.max_attempts(), 3);
        assert_eq!(config.retry_strategy.delay(5), Duration::from_millis(20));

        for (name, value) in [("BATCH_SIZE", "big"), ("BATCH_SIZE", "0"), ("MAX_RETRIES", "-1")] {
            assert!(
                matches!(
                    config_from(&[ADDRESS, (name, value)]),
                    Err(ConfigError::InvalidNumber { .. })
                ),
                "{name}={value}"
            );
        }
    }

    #[test]
    fn extra_labels_are_prefixed() {
        let labels = parse_extra_labels("env,prod,team,logs", false).unwrap();
        assert_eq!(labels.get("__extra_env"), Some("prod"));
        assert_eq!(labels.get("__extra_team"), Some("logs"));
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn extra_labels_prefix_can_be_omitted() {
        let labels = parse_extra_labels("env,prod", true).unwrap();
        assert_eq!(labels.get("env"), Some("prod"));
    }

    #[test]
    fn extra_labels_must_be_pairs_of_valid_names() {
        assert!(matches!(
            parse_extra_labels("env,prod,team", false),
            Err(ConfigError::OddExtraLabels)
        ));
        assert!(matches!(
            parse_extra_labels("aws-service,s3", true),
            Err(ConfigError::InvalidExtraLabel(_))
        ));
        assert!(parse_extra_labels("", false).unwrap().is_empty());
    }

    #[test]
    fn flusher_config_carries_endpoint() {
        let config = config_from(&[ADDRESS, ("TENANT_ID", "team-a"), ("BEARER_TOKEN", "t")])
            .unwrap();
        let flusher = config.flusher_config();
        assert_eq!(flusher.endpoint.url.as_str(), ADDRESS.1);
        assert_eq!(flusher.endpoint.tenant_id.as_deref(), Some("team-a"));
        assert_eq!(flusher.endpoint.credentials, Credentials::Bearer("t".to_string()));
    }

    #[test]
    #[serial]
    fn reads_process_environment() {
        env::set_var("WRITE_ADDRESS", "http://localhost:3100/loki/api/v1/push");
        env::set_var("EXTRA_LABELS", "env,test");
        let config = Config::from_env().unwrap();
        env::remove_var("WRITE_ADDRESS");
        env::remove_var("EXTRA_LABELS");

        assert_eq!(config.write_address.port(), Some(3100));
        assert_eq!(config.extra_labels.get("__extra_env"), Some("test"));
    }

    #[test]
    #[serial]
    fn missing_environment_is_fatal() {
        env::remove_var("WRITE_ADDRESS");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::MissingWriteAddress)
        ));
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use lambda_runtime::{service_fn, LambdaEvent};
use serde_json::Value;
use std::env;
use std::time::SystemTime;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use lambda_promtail::{
    adapters::s3::S3ObjectStore,
    config::{log_filter, Config},
    errors::ConfigError,
    geoip::{GeoIpAnnotator, NoopAnnotator, RegionAnnotator},
    handler::{remaining_time, Handler},
};
use loki_push::flusher::Flusher;

#[tokio::main]
pub async fn main() -> Result<(), lambda_runtime::Error> {
    let env_filter = log_filter(env::var("LOG_LEVEL").ok().as_deref());

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return Err(e.into());
        }
    };
    info!(
        "Shipping to {} (batch size {} bytes, extra labels {})",
        config.write_address, config.batch_size, config.extra_labels
    );

    let flusher = match Flusher::new(config.flusher_config()) {
        Ok(flusher) => flusher,
        Err(e) => {
            let e = ConfigError::from(e);
            error!("{e}");
            return Err(e.into());
        }
    };

    let annotator: Box<dyn RegionAnnotator> = match &config.geoip_db_path {
        Some(path) => match GeoIpAnnotator::open(path) {
            Ok(annotator) => Box::new(annotator),
            Err(e) => {
                error!("{e}");
                return Err(e.into());
            }
        },
        None => Box::new(NoopAnnotator),
    };

    let handler = Handler::new(
        config.pipeline_settings(),
        Box::new(flusher),
        annotator,
        Box::new(S3ObjectStore::new()),
    );
    let handler = &handler;

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        let budget = remaining_time(event.context.deadline, SystemTime::now());
        if let Err(e) = handler.handle_with_deadline(event.payload, budget).await {
            error!("Invocation {} failed: {e}", event.context.request_id);
            return Err(lambda_runtime::Error::from(e));
        }
        Ok::<(), lambda_runtime::Error>(())
    }))
    .await
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use log_pipeline::MemoryPersister;

mod config;
mod hostname;
mod logger;

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = config::log_level();
    let env_filter = format!("rustls=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .event_format(logger::Formatter)
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config::AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    debug!("Agent configuration: {config:?}");

    let pipeline = match config.pipeline_config().build() {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Failed to build pipeline: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = pipeline.start(Arc::new(MemoryPersister::new())).await {
        error!("Failed to start pipeline: {e}");
        return ExitCode::FAILURE;
    }
    info!("Log pipeline agent started");

    let exit_code = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => error!("Unable to listen for shutdown signal: {e}"),
            }
            ExitCode::SUCCESS
        }
        Some(e) = pipeline.fatal_error() => {
            error!("Shutting down after fatal error: {e}");
            ExitCode::FAILURE
        }
    };

    pipeline.stop().await;
    info!("Log pipeline agent stopped");
    exit_code
}

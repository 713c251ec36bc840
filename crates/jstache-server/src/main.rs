// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logging;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use jstache::{
    config::{self, Config, ConfigError, DEFAULT_PROPERTIES},
    errors::RelayError,
    forwarder::HttpForwarder,
    listener::Listener,
};

/// Names an explicit properties file, which then must exist.
const CONFIG_ENV: &str = "JSTACHE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "config.properties";

fn load_config() -> Result<Config, ConfigError> {
    match env::var_os(CONFIG_ENV) {
        Some(path) => config::get_config(PathBuf::from(path), None),
        None => config::get_config(PathBuf::from(DEFAULT_CONFIG_FILE), Some(DEFAULT_PROPERTIES)),
    }
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = tracing::subscriber::with_default(logging::bootstrap_subscriber(), || {
        load_config().map_err(|e| error!("Invalid configuration: {}", e))
    });
    let Ok(config) = config else {
        return ExitCode::FAILURE;
    };

    let _log_guard = logging::init(&config);
    info!("Starting jstache with configuration:\n{}", config);

    let forwarder = match HttpForwarder::new(&config) {
        Ok(forwarder) => forwarder,
        Err(e) => {
            error!("{}", RelayError::from(e));
            return ExitCode::FAILURE;
        }
    };

    let cancel_token = CancellationToken::new();
    let listener = match Listener::bind(
        Arc::new(config),
        Arc::new(forwarder),
        cancel_token.clone(),
    )
    .await
    {
        Ok(listener) => listener,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for interrupt signal: {}", e);
            return;
        }
        info!("Received interrupt, no longer accepting connections");
        cancel_token.cancel();
    });

    listener.run().await;
    debug!("Relay stopped");
    ExitCode::SUCCESS
}

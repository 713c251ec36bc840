// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Global subscriber setup: console output, plus an optional append-only log file.

use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use jstache::config::Config;
use jstache::logger::Formatter;
use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Overrides the computed filter directives when set.
pub const LOG_ENV: &str = "JSTACHE_LOG";

const QUIET_TARGETS: &str = "h2=off,hyper=off,reqwest=off,rustls=off";

fn directives(debug: bool, custom: Option<String>) -> String {
    custom.unwrap_or_else(|| {
        let level = if debug { "debug" } else { "info" };
        format!("{QUIET_TARGETS},{level}")
    })
}

/// Builds the filter, falling back to the defaults when `JSTACHE_LOG` does not parse.
fn env_filter(debug: bool) -> (EnvFilter, Option<String>) {
    let custom = env::var(LOG_ENV).ok();
    match EnvFilter::try_new(directives(debug, custom)) {
        Ok(filter) => (filter, None),
        Err(e) => (
            EnvFilter::new(directives(debug, None)),
            Some(format!("Ignoring invalid {LOG_ENV}: {e}")),
        ),
    }
}

/// Subscriber used while the configuration is still being loaded.
pub fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    fmt::Subscriber::builder()
        .event_format(Formatter)
        .with_env_filter(env_filter(false).0)
        .finish()
}

fn file_writer(path: &Path) -> io::Result<(NonBlocking, WorkerGuard)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(tracing_appender::non_blocking(file))
}

/// Installs the global subscriber. The returned guard flushes the log file when
/// dropped and must be kept alive until the process exits.
pub fn init(config: &Config) -> Option<WorkerGuard> {
    let (filter, filter_warning) = env_filter(config.debug);
    let console = fmt::layer().event_format(Formatter).with_writer(io::stdout);

    let mut file_warning = None;
    let (file, guard) = match config.log_file.as_deref().map(file_writer) {
        Some(Ok((writer, guard))) => (
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .event_format(Formatter)
                    .with_writer(writer),
            ),
            Some(guard),
        ),
        Some(Err(e)) => {
            file_warning = Some(format!("Unable to open log file, logging to stdout only: {e}"));
            (None, None)
        }
        None => (None, None),
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
    {
        eprintln!("Failed to install log subscriber: {e}");
    }

    for warning in [filter_warning, file_warning].into_iter().flatten() {
        warn!("{}", warning);
    }
    guard
}

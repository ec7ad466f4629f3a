//! Tracing subscriber setup for host processes.
//!
//! The engine itself only emits `tracing` events. Hosts that have no
//! subscriber of their own can call [`init`] once at startup.

use crate::config::LoggingConfig;
use crate::error::{GraphError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.filter`. When `config.directory` is set, a
/// daily-rolling file layer is added and its guard returned; keep the guard
/// alive for as long as file logging should keep flushing.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(&config.filter)?;
    let stdout = tracing_subscriber::fmt::layer()
        .with_ansi(config.ansi)
        .with_thread_names(true);

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file_layer)
        .try_init()
        .map_err(|e| GraphError::Logging(e.to_string()))?;

    tracing::debug!("Logging initialised (filter '{}')", config.filter);
    Ok(guard)
}

fn build_filter(fallback: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(fallback)
            .map_err(|e| GraphError::Logging(format!("Invalid log filter '{}': {}", fallback, e))),
    }
}

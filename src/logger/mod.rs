//! Logger module
//!
//! Provides logging utilities for the service including:
//! - Subscriber setup (level filter, text or JSON output, optional file)
//! - Server lifecycle logging
//! - Access logging with multiple formats
//! - Error and warning logging

mod format;
pub mod writer;

pub use format::AccessLogEntry;

use crate::config::{Config, LoggingConfig};
use std::net::SocketAddr;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("failed to open log output: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid log level filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("logger already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps the background log writer alive; drop it last
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Initialize the global subscriber with configuration
///
/// Should be called once at application startup. `RUST_LOG` takes precedence
/// over `logging.level` when set.
pub fn init(config: &LoggingConfig) -> Result<LogGuard, LoggerError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    let (writer, guard) = writer::make_writer(config.log_file.as_deref())?;
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.format == "json" {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer()
            .with_ansi(config.log_file.is_none())
            .with_writer(writer)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init()?;

    Ok(LogGuard { _guard: guard })
}

pub fn log_server_start(addr: &SocketAddr, config: &Config) {
    tracing::info!("======================================");
    tracing::info!("airbox started");
    tracing::info!("Listening on: http://{addr}");
    tracing::info!("Log level: {}", config.logging.level);
    if let Some(workers) = config.server.workers {
        tracing::info!("Worker threads: {workers}");
    }
    if let Some(ref path) = config.logging.log_file {
        tracing::info!("Log file: {path}");
    }
    match config.run.deadline_secs {
        Some(secs) => tracing::info!("Run deadline: {secs}s"),
        None => tracing::info!("Run deadline: none"),
    }
    tracing::info!("Max body size: {} bytes", config.http.max_body_size);
    tracing::info!("Max connections: {:?}", config.performance.max_connections);
    tracing::info!("======================================");
}

pub fn log_connection_accepted(peer_addr: &SocketAddr) {
    tracing::debug!(%peer_addr, "connection accepted");
}

pub fn log_connection_error(err: &impl std::fmt::Debug) {
    tracing::error!("Failed to serve connection: {err:?}");
}

pub fn log_error(message: &str) {
    tracing::error!("{message}");
}

pub fn log_warning(message: &str) {
    tracing::warn!("{message}");
}

/// Log formatted access log entry
pub fn log_access(entry: &AccessLogEntry, format: &str) {
    tracing::info!(target: "access", "{}", entry.format(format));
}

pub fn log_shutdown(active_connections: usize) {
    tracing::info!(active_connections, "shutdown requested, listener closed");
}

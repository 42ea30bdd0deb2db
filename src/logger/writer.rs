//! Log writer module
//!
//! Builds the non-blocking sink behind the tracing subscriber: stdout by
//! default, or an append-mode file.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

/// Create the log sink. The guard must be held until shutdown so buffered
/// lines are flushed.
pub fn make_writer(log_file: Option<&str>) -> io::Result<(NonBlocking, WorkerGuard)> {
    match log_file {
        Some(path) => Ok(tracing_appender::non_blocking(open_log_file(path)?)),
        None => Ok(tracing_appender::non_blocking(io::stdout())),
    }
}

/// Open or create a log file for appending
fn open_log_file(path: &str) -> io::Result<File> {
    // Create parent directories if they don't exist
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    OpenOptions::new().create(true).append(true).open(path)
}

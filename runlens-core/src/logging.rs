//! Logging infrastructure for runlens
//!
//! Diagnostics go to stderr so they interleave with the CI job log. An
//! optional daily-rotated file copy is written to
//! `~/.local/state/runlens/runlens.log` following XDG standards.

use crate::config::{AnalyticsConfig, LogLevel};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize the logging system
///
/// Sets up tracing with:
/// - Non-blocking stderr output
/// - Optional rotated file output in the XDG state directory
/// - Level from `logLevel`, overridable via the RUST_LOG env var
pub fn init(level: LogLevel, log_to_file: bool) -> crate::error::Result<LoggingGuard> {
    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let stderr_layer = fmt::layer()
        .with_writer(stderr_writer)
        .with_target(true);

    let mut guards = vec![stderr_guard];
    let file_layer = if log_to_file {
        let log_dir = AnalyticsConfig::state_dir();
        std::fs::create_dir_all(&log_dir)?;

        let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "runlens.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        guards.push(guard);

        Some(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
    } else {
        None
    };

    // A subscriber may already be installed (embedding host, repeated init).
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    tracing::debug!(level = %level, log_to_file, "Logging initialized");

    Ok(LoggingGuard { _guards: guards })
}

/// Initialize logging for tests (logs to stdout)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

/// Returns the log file path
pub fn log_file_path() -> PathBuf {
    AnalyticsConfig::log_path()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path() {
        let path = log_file_path();
        assert!(path.ends_with("runlens.log"));
    }
}

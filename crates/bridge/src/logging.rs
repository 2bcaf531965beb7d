//! Tracing subscriber setup.

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogConfig;

/// Number of daily log files kept on disk.
const MAX_LOG_FILES: usize = 7;

/// Picks the filter directive: `--verbose` forces debug, then `RUST_LOG`,
/// then the configured level.
pub fn filter_directive(config: &LogConfig, verbose: bool) -> String {
    if verbose {
        return "debug".to_string();
    }
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directive) if !directive.is_empty() => directive,
        _ => config.level.to_lowercase(),
    }
}

/// Installs the global subscriber.
///
/// Logs always go to stderr. When `config.file` is set they are also written
/// to a daily rolling file in that directory; the returned guard must be
/// held until exit so buffered lines are flushed.
pub fn init(config: &LogConfig, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(filter_directive(config, verbose))
        .context("invalid log filter")?;

    let (file_layer, guard) = match &config.file {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;

            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(MAX_LOG_FILES)
                .filename_prefix("termbridge")
                .filename_suffix("log")
                .build(dir)
                .context("failed to create rolling file appender")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

//! Log setup for the command-line binary.
//!
//! Stdout carries command output, so full logs go to a daily rolling file in
//! the data directory and only warnings and errors reach stderr.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_ENV: &str = "QNA_LOG";
const DEFAULT_FILTER: &str = "info";

/// `$XDG_DATA_HOME/qna/logs`, or `./log` when no data directory exists.
pub fn log_dir() -> PathBuf {
  dirs::data_dir()
    .map(|d| d.join("qna").join("logs"))
    .unwrap_or_else(|| PathBuf::from("log"))
}

fn file_filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Keep the guard alive for the life of the
/// process or buffered lines are lost on exit.
pub fn init() -> color_eyre::Result<WorkerGuard> {
  let dir = log_dir();
  std::fs::create_dir_all(&dir)?;

  let appender = tracing_appender::rolling::daily(&dir, "qna.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(
      fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false)
        .with_filter(file_filter()),
    )
    .with(
      fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new("warn")),
    )
    .try_init()?;

  tracing::debug!(dir = %dir.display(), "logging initialized");
  Ok(guard)
}

//! Log subscriber setup for the binary.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "noghre.log";

/// `RUST_LOG` wins over the configured level; an unparsable level falls back to `info`.
pub fn filter(level: &str) -> EnvFilter {
  EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(level))
    .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log to a daily rolling file in `dir`. Keep the guard alive until exit so
/// buffered lines are flushed.
pub fn init(level: &str, dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(filter(level))
    .with(
      fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(writer),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_init_creates_log_directory() {
    let dir = tempfile::tempdir().unwrap();
    let logs = dir.path().join("logs");

    let guard = init("debug", &logs).unwrap();
    tracing::info!("written to the rolling file");
    drop(guard);

    assert!(logs.is_dir());
  }
}

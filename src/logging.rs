//! Tracing setup for the CLI.
//!
//! Everything at the filter level goes to a daily log file under the data
//! directory; warnings and errors are also echoed to stderr.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable holding the filter directive.
pub const LOG_ENV: &str = "SYNKA_LOG";

#[derive(Debug, Clone)]
pub struct LogConfig {
  /// Filter used when `SYNKA_LOG` is unset.
  pub default_filter: String,
  /// Directory for the rolling log file. `None` logs to stderr only.
  pub dir: Option<PathBuf>,
  /// Minimum level echoed to stderr.
  pub stderr_level: LevelFilter,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      default_filter: "info".to_string(),
      dir: dirs::data_dir().map(|d| d.join("synka").join("logs")),
      stderr_level: LevelFilter::WARN,
    }
  }
}

impl LogConfig {
  /// Raise stderr output with each `-v`.
  pub fn with_verbosity(mut self, verbosity: u8) -> Self {
    self.stderr_level = match verbosity {
      0 => LevelFilter::WARN,
      1 => LevelFilter::INFO,
      2 => LevelFilter::DEBUG,
      _ => LevelFilter::TRACE,
    };
    self
  }

  fn filter(&self) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
  }
}

/// Install the global subscriber. Keep the returned guard alive until exit
/// so buffered file output is flushed.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let (file_layer, guard) = match &config.dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(dir, "synka-offline.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (
        Some(fmt::layer().with_writer(writer).with_ansi(false)),
        Some(guard),
      )
    }
    None => (None, None),
  };

  let stderr_layer = fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .without_time()
    .with_filter(config.stderr_level);

  tracing_subscriber::registry()
    .with(config.filter())
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

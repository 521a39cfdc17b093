//! Tracing subscriber setup for hosts and the CLI.
//!
//! Console output always goes to stderr. When a log file is configured, a
//! second non-blocking layer writes plain text to it; keep the returned
//! [`LoggingGuard`] alive until shutdown so buffered lines are flushed.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::error::{FeedError, FeedResult};

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "feedcache=info";

/// Filter used by `--verbose`.
pub const VERBOSE_LOG_FILTER: &str = "feedcache=debug";

/// Logging options.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Directive used when `RUST_LOG` is unset; defaults to [`DEFAULT_LOG_FILTER`].
    pub filter: Option<String>,
    /// Also append logs to this file.
    pub log_file: Option<PathBuf>,
    /// Include targets and span events on the console.
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    fn directive(&self) -> &str {
        match (&self.filter, self.verbose) {
            (Some(filter), _) => filter,
            (None, true) => VERBOSE_LOG_FILTER,
            (None, false) => DEFAULT_LOG_FILTER,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
    }
}

/// Keeps the file writer alive; dropping it flushes pending lines.
#[derive(Debug)]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global tracing subscriber.
///
/// Fails with [`FeedError::Config`] if the log file cannot be opened or a
/// global subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> FeedResult<LoggingGuard> {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.verbose)
        .with_filter(config.env_filter());

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_file(path)?);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(config.env_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| FeedError::Config(format!("logging already initialised: {e}")))?;

    Ok(LoggingGuard { _file: guard })
}

fn open_log_file(path: &Path) -> FeedResult<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| FeedError::Config(format!("{}: {e}", parent.display())))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| FeedError::Config(format!("{}: {e}", path.display())))
}

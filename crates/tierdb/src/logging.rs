//! Logging setup for tierdb
//!
//! The storage crates emit `tracing` events (flushes, compactions, cache
//! and rate limiter metrics). This module installs a subscriber for them.
//! Library users who already run their own subscriber can skip it.

use std::path::{Path, PathBuf};
use tierdb_core::{Error, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILE: &str = "tierdb.log";

/// Where log lines go
#[derive(Debug, Clone)]
pub enum LogOutput {
    Stdout,
    /// Daily-rotated file
    File(PathBuf),
    /// Stdout and a daily-rotated file
    Both(PathBuf),
}

/// Log format style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable
    Pretty,
    /// Single line per event
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `tierdb_storage=debug`
    pub level: String,
    pub output: LogOutput,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            format: LogFormat::Compact,
        }
    }
}

impl LogConfig {
    pub fn info() -> Self {
        Self::default()
    }

    pub fn debug() -> Self {
        Self::default().with_level("debug")
    }

    pub fn warn() -> Self {
        Self::default().with_level("warn")
    }

    /// Debug output for the table layer only, everything else at `info`
    pub fn storage_debug() -> Self {
        Self::default().with_level("info,tierdb_storage=debug")
    }

    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::File(path.into());
        self
    }

    pub fn with_both<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::Both(path.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    /// Build the filter. `RUST_LOG` takes precedence over `level`.
    pub fn filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .map_err(|e| Error::InvalidConfig(format!("log level {:?}: {}", self.level, e)))
    }

    /// Install this configuration as the global subscriber
    ///
    /// Keep the returned guard alive while logging to a file; dropping it
    /// flushes and stops the background writer. Fails if a global
    /// subscriber is already installed.
    ///
    /// ```rust,no_run
    /// use tierdb::logging::LogConfig;
    ///
    /// let _guard = LogConfig::storage_debug().with_file("logs/tierdb.log").init()?;
    /// # Ok::<(), tierdb::Error>(())
    /// ```
    pub fn init(self) -> Result<Option<WorkerGuard>> {
        let filter = self.filter()?;
        let registry = tracing_subscriber::registry().with(filter);

        let guard = match (&self.output, self.format) {
            (LogOutput::Stdout, LogFormat::Pretty) => {
                registry.with(fmt::layer().pretty()).try_init().map_err(init_error)?;
                None
            }
            (LogOutput::Stdout, LogFormat::Compact) => {
                registry.with(fmt::layer().compact()).try_init().map_err(init_error)?;
                None
            }
            (LogOutput::File(path), format) => {
                let (writer, guard) = tracing_appender::non_blocking(rolling_file(path));
                let layer = fmt::layer().with_writer(writer).with_ansi(false);
                match format {
                    LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
                    LogFormat::Compact => registry.with(layer.compact()).try_init(),
                }
                .map_err(init_error)?;
                Some(guard)
            }
            (LogOutput::Both(path), _) => {
                // One format for both layers; the file never gets ANSI colors
                let (writer, guard) = tracing_appender::non_blocking(rolling_file(path));
                registry
                    .with(fmt::layer().compact())
                    .with(fmt::layer().with_writer(writer).with_ansi(false).compact())
                    .try_init()
                    .map_err(init_error)?;
                Some(guard)
            }
        };
        Ok(guard)
    }
}

fn rolling_file(path: &Path) -> tracing_appender::rolling::RollingFileAppender {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    tracing_appender::rolling::daily(directory, file_name)
}

fn init_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::InvalidConfig(format!("logging already initialized: {}", e))
}

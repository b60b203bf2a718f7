//! Leveled log sinks and subscriber setup.
//!
//! The extractor never logs through a global: it is handed a [`LogSink`] and
//! reports progress, warnings and errors through it. [`TracingSink`] forwards
//! to `tracing`, which is what the binary installs a subscriber for.

use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::config::LoggingConfig;
use crate::error::{ExtractError, Result};

/// Something that accepts leveled messages.
pub trait LogSink {
    fn log(&self, level: Level, message: &str);

    fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }
}

impl<T: LogSink + ?Sized> LogSink for &T {
    fn log(&self, level: Level, message: &str) {
        (**self).log(level, message);
    }
}

impl<T: LogSink + ?Sized> LogSink for Box<T> {
    fn log(&self, level: Level, message: &str) {
        (**self).log(level, message);
    }
}

impl<T: LogSink + ?Sized> LogSink for std::sync::Arc<T> {
    fn log(&self, level: Level, message: &str) {
        (**self).log(level, message);
    }
}

/// Forwards messages to the `tracing` macros under the `watercolorinator` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "watercolorinator", "{message}"),
            Level::WARN => tracing::warn!(target: "watercolorinator", "{message}"),
            Level::INFO => tracing::info!(target: "watercolorinator", "{message}"),
            Level::DEBUG => tracing::debug!(target: "watercolorinator", "{message}"),
            _ => tracing::trace!(target: "watercolorinator", "{message}"),
        }
    }
}

/// Drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: Level, _message: &str) {}
}

/// Parse a level name, accepting the RFC 5424 severities as aliases.
pub fn parse_level(name: &str) -> Result<LevelFilter> {
    let normalized = match name.trim().to_ascii_lowercase().as_str() {
        "notice" | "informational" => "info".to_string(),
        "warning" => "warn".to_string(),
        "critical" | "alert" | "emergency" | "err" => "error".to_string(),
        other => other.to_string(),
    };
    normalized
        .parse::<LevelFilter>()
        .map_err(|_| ExtractError::invalid(format!("unknown log level `{name}`")))
}

/// Install the global `tracing` subscriber: a console layer, plus a plain-text
/// file layer when `log_file` is set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let level = parse_level(&config.level)?;

    let file_layer = match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| ExtractError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| ExtractError::Io {
                    path: path.clone(),
                    source,
                })?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(level)
        .with(fmt::layer().with_ansi(config.ansi).with_target(true))
        .with(file_layer)
        .try_init()
        .map_err(|e| ExtractError::Logging(e.to_string()))
}

//! Structured logging for COPE engines and simulations
//!
//! Engines log through `tracing` with fixed field names (`fingerprint`,
//! `iface`, `dest`, `degree`, ...). This crate wires up the subscriber:
//!
//! - **JSONL Output**: structured JSON lines on the console (default)
//! - **Pretty Output**: human-readable console for development
//! - **File Output**: JSONL files with daily, hourly or no rotation
//! - **Engine Level**: a separate filter for the engine's per-packet events
//! - **Node Context**: per-node labels on every span via [`NodeContextGuard`]
//!
//! # Quick Start
//!
//! ```ignore
//! use cope_logging::{CopeSubscriberBuilder, LogConfig};
//!
//! let _guard = CopeSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init()?;
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{NodeContextData, NodeContextGuard};
pub use layers::{NodeContextExtension, NodeContextLayer};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to prepare log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Global subscriber already set: {0}")]
    AlreadyInitialized(String),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builder for configuring and initializing the logging subscriber
///
/// By default console output uses JSONL. Use [`LogConfig::development`] for
/// human-readable output.
#[derive(Debug, Default)]
pub struct CopeSubscriberBuilder {
    config: LogConfig,
}

impl CopeSubscriberBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally.
    ///
    /// The returned guard flushes file output when dropped; keep it alive
    /// for the life of the program.
    pub fn init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.config.filter_directives()));

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        if self.config.console.enabled {
            layers.push(self.console_layer());
        }
        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            layers.push(layers::jsonl_layer(writer, &self.config.jsonl));
            guard = Some(file_guard);
        }

        Registry::default()
            .with(layers)
            .with(env_filter)
            .with(NodeContextLayer::new())
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

        if !self.config.jsonl.extra_fields.is_empty() {
            let fields = serde_json::to_string(&self.config.jsonl.extra_fields)
                .unwrap_or_default();
            tracing::info!(%fields, "Logging initialized");
        }
        Ok(guard)
    }

    fn console_layer(&self) -> BoxedLayer {
        if self.config.console.pretty {
            tracing_subscriber::fmt::layer()
                .with_ansi(self.config.console.ansi)
                .with_target(true)
                .boxed()
        } else {
            layers::jsonl_layer(std::io::stdout, &self.config.jsonl)
        }
    }
}

/// Truncates a single file for [`RotationStrategy::Never`], appends otherwise
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;
    let writer = match config.rotation {
        RotationStrategy::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            tracing_appender::non_blocking(File::create(path)?)
        }
        RotationStrategy::Daily => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::DAILY,
            &config.directory,
            &config.prefix,
        )),
        RotationStrategy::Hourly => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::HOURLY,
            &config.directory,
            &config.prefix,
        )),
    };
    Ok(writer)
}

/// JSONL to console
pub fn init_default() -> Result<Option<WorkerGuard>, LoggingError> {
    CopeSubscriberBuilder::new().init()
}

/// Verbose, pretty console output
pub fn init_development() -> Result<Option<WorkerGuard>, LoggingError> {
    CopeSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Warnings only; safe to call from every test
pub fn init_testing() {
    let _ = CopeSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}

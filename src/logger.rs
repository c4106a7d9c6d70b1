//! Logging initialization.
//!
//! `LoggerManager` validates the `[logger]` section and installs the global
//! `tracing` subscriber with up to three layers: console, systemd journald,
//! and an append-only error file.

use std::{fs::OpenOptions, io, sync::Arc};

use thiserror::Error;
use tracing::instrument;
use tracing_subscriber::{fmt, fmt::format::FmtSpan, prelude::*, EnvFilter, Layer};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, FileLogConfig, LogFormat, LoggerConfig},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Logger initialization error: {0}")]
    InitializationError(String),

    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,

    #[error(
        "Failed to initialize journald logger while console logging is enabled. \
         Please check your configuration."
    )]
    JournaldFailedWithConsoleEnabled,
}

/// Builds and installs the global `tracing` subscriber from `[logger]`.
pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    /// # Errors
    /// - `LoggerError::ValidationError` if `config` is invalid
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;

        Ok(LoggerManager { config })
    }

    /// Installs the global subscriber. Call once, before the first event
    /// that should be recorded.
    #[instrument(skip(self))]
    pub fn init(&mut self) -> Result<(), LoggerError> {
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if let Some(console_config) = self.config.console.as_ref().filter(|c| c.enabled) {
            layers.push(Self::init_console_logger(console_config, self.env_filter()));
        }

        if let Some(journald_config) = self.config.journald.as_ref().filter(|j| j.enabled) {
            match Self::init_journald_logger(self.env_filter()) {
                Ok(journald_layer) => {
                    layers.push(journald_layer);
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        journald_config.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                    if self.config.console.as_ref().is_some_and(|c| c.enabled) {
                        return Err(LoggerError::JournaldFailedWithConsoleEnabled);
                    }
                }
            }
        }

        if let Some(file_config) = self.config.file.as_ref().filter(|f| f.enabled) {
            layers.push(Self::init_file_logger(file_config)?);
            print_info!(
                "File logger writing {} and above to {}",
                file_config.level,
                file_config.path.display()
            );
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }

    /// `RUST_LOG` when set, the configured level otherwise.
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.level))
    }

    fn init_console_logger(config: &ConsoleConfig, filter: EnvFilter) -> BoxedLayer {
        let span_events = if config.show_spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let base = fmt::layer()
            .with_target(config.show_target)
            .with_thread_ids(config.show_thread_ids)
            .with_span_events(span_events)
            .with_ansi(config.ansi_colors)
            .with_writer(io::stdout);

        match config.format {
            LogFormat::Json => base.json().with_filter(filter).boxed(),
            LogFormat::Pretty => base.pretty().with_filter(filter).boxed(),
            LogFormat::Compact => base.compact().with_filter(filter).boxed(),
        }
    }

    fn init_journald_logger(filter: EnvFilter) -> Result<BoxedLayer, LoggerError> {
        let journald_layer = tracing_journald::layer()?;
        Ok(journald_layer.with_filter(filter).boxed())
    }

    fn init_file_logger(config: &FileLogConfig) -> Result<BoxedLayer, LoggerError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;

        Ok(fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(Arc::new(file))
            .with_filter(EnvFilter::new(&config.level))
            .boxed())
    }
}

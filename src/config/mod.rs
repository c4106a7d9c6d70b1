//! Application configuration loading and validation.
//!
//! The top-level `Config` aggregates logging, device identity, sensor
//! sampling, broker and metrics endpoint settings. It is read once from a
//! TOML file at startup, validated as a whole, and never mutated afterwards.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::{
    imu::{DeviceConfig, ImuConfig, InfluxConfig},
    logger::LoggerConfig,
};

pub mod imu;
pub mod logger;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/imuflux/config.toml";

/// Timestamp used by the `print_*` macros before tracing is initialized.
#[doc(hidden)]
pub fn early_timestamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

/// Timestamped console output for the window before the tracing subscriber
/// exists (config loading, logger setup failures).
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(err: validator::ValidationErrors) -> Self {
        ConfigError::ValidationError(err.to_string())
    }
}

/// Top-level application configuration.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    #[validate(nested)]
    pub device: DeviceConfig,

    #[validate(nested)]
    pub imu: ImuConfig,

    #[validate(nested)]
    pub mqtt: imuflux_mqtt::Config,

    #[validate(nested)]
    pub influx: InfluxConfig,
}

impl Config {
    /// Loads the configuration from `path`, or from the default location
    /// when no path was given on the command line or in the environment.
    pub fn new(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = Self::resolve_path(path)?;
        Self::load(&config_path)
    }

    fn resolve_path(path: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = path {
            print_info!("Using config from command line: {}", path.display());
            return Ok(path);
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(fallback.to_path_buf());
        }

        Err(ConfigError::Config(format!(
            "No configuration file found (pass --config or set IMUFLUX_CONFIG, or create {})",
            DEFAULT_CONFIG_PATH
        )))
    }

    /// Reads, parses and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config_str = fs::read_to_string(path)?;
        let config = Self::parse(&config_str)?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parses and validates configuration text.
    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

//! `[logger]`: console, journald and error-file output settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Console line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggerConfig {
    /// Global log level: trace, debug, info, warn or error (case-insensitive).
    /// `RUST_LOG` overrides it for the console and journald outputs.
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,

    #[validate(nested)]
    pub console: Option<ConsoleConfig>,

    #[validate(nested)]
    pub journald: Option<JournaldConfig>,

    /// Append-only log file for errors that must survive a console restart.
    #[validate(nested)]
    pub file: Option<FileLogConfig>,
}

pub(crate) fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

    if LEVELS.iter().any(|known| known.eq_ignore_ascii_case(level)) {
        return Ok(());
    }
    Err(ValidationError::new("invalid_log_level")
        .with_message(format!("Invalid log level: {}", level).into()))
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            level: "info".to_string(),
            console: Some(ConsoleConfig::default()),
            journald: Some(JournaldConfig::default()),
            file: Some(FileLogConfig::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,

    #[serde(default)]
    pub format: LogFormat,

    /// Include the module path of each event.
    pub show_target: bool,

    pub show_thread_ids: bool,

    /// Emit span close events.
    pub show_spans: bool,

    pub ansi_colors: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            enabled: true,
            format: LogFormat::default(),
            show_target: false,
            show_thread_ids: false,
            show_spans: false,
            ansi_colors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JournaldConfig {
    #[serde(default)]
    pub enabled: bool,

    #[validate(length(min = 1))]
    pub identifier: String,
}

impl Default for JournaldConfig {
    fn default() -> Self {
        JournaldConfig {
            enabled: false,
            identifier: "imuflux".to_string(),
        }
    }
}

/// Plain-text log file. Not filtered by `RUST_LOG`; only `level` applies.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FileLogConfig {
    pub enabled: bool,

    pub path: PathBuf,

    #[validate(custom(function = "validate_log_level"))]
    pub level: String,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        FileLogConfig {
            enabled: false,
            path: PathBuf::from("/var/log/imuflux.log"),
            level: "error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_logger_config_is_valid() {
        let config = LoggerConfig::default();
        assert!(config.validate().is_ok());

        let file = config.file.unwrap();
        assert!(!file.enabled);
        assert_eq!(file.level, "error");
        assert_eq!(file.path, PathBuf::from("/var/log/imuflux.log"));
    }

    #[test]
    fn test_invalid_levels_rejected() {
        let config = LoggerConfig {
            level: "verbose".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = LoggerConfig {
            file: Some(FileLogConfig {
                level: "loud".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_format_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: LogFormat,
        }

        let parsed: Wrapper = toml::from_str(r#"format = "json""#).unwrap();
        assert_eq!(parsed.format, LogFormat::Json);
        assert!(toml::from_str::<Wrapper>(r#"format = "xml""#).is_err());
    }

    #[test]
    fn test_log_level_case_insensitive() {
        assert!(validate_log_level("DEBUG").is_ok());
        assert!(validate_log_level("Warn").is_ok());
    }
}

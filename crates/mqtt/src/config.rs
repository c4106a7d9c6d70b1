//! Broker session configuration.
//!
//! Deserialized from the `[mqtt]` table of the application config. Every
//! constraint is declared with `validator` attributes so a bad file is
//! rejected at load time rather than at connect time.
//!
//! ```toml
//! [mqtt]
//! host = "broker.local"
//! port = 8883
//! username = "imu"
//! password = "secret"
//!
//! [mqtt.tls]
//! enabled = true
//! version = "tlsv1.2"
//! insecure = false
//!
//! [mqtt.tls.certs]
//! certdir = "/etc/imuflux/certs"
//! cafile = "ca.crt"
//! certfile = "client.crt"
//! keyfile = "client.key"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Connection settings for the MQTT broker.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Broker hostname or IP address. Resolved at connect time.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    /// Broker port (1883 plain, 8883 TLS by convention).
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Credentials are only sent when both username and password are non-empty.
    pub username: String,

    pub password: String,

    /// Explicit client id. When absent the caller derives one from the device
    /// identity, and a random UUID is the last resort.
    #[validate(length(
        min = 1,
        max = 128,
        message = "Client ID must be between 1 and 128 characters"
    ))]
    pub client_id: Option<String>,

    /// Keep-alive interval in seconds.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    pub clean_session: bool,

    /// Maximum QoS 1 publishes awaiting PUBACK at once.
    #[validate(range(
        min = 1,
        max = 1000,
        message = "Max inflight must be between 1 and 1000"
    ))]
    pub max_inflight: u16,

    /// Requests that can be queued for the event loop before `try_publish`
    /// starts refusing them.
    #[validate(range(
        min = 1,
        max = 1000,
        message = "Request channel capacity must be between 1 and 1000"
    ))]
    pub request_channel_capacity: usize,

    /// Seconds to wait for the first CONNACK at startup.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connection timeout must be between 1 and 300 seconds"
    ))]
    pub connection_timeout: u64,

    /// Seconds to pause before polling again after a transient network error.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Reconnect delay must be between 1 and 60 seconds"
    ))]
    pub reconnect_delay: u64,

    #[validate(nested)]
    pub tls: TlsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: None,
            keep_alive: 60,
            clean_session: true,
            max_inflight: 100,
            request_channel_capacity: 10,
            connection_timeout: 10,
            reconnect_delay: 5,
            tls: TlsConfig::default(),
        }
    }
}

impl Config {
    /// Returns the credential pair if both halves are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() || self.password.is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }
}

/// TLS protocol version requested for the broker connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TlsVersion {
    #[serde(rename = "tlsv1")]
    Tlsv1,
    #[serde(rename = "tlsv1.1")]
    Tlsv11,
    #[serde(rename = "tlsv1.2")]
    Tlsv12,
    #[serde(rename = "tlsv1.3")]
    Tlsv13,
    /// Any unrecognised value: let the TLS stack negotiate.
    #[default]
    #[serde(rename = "default", other)]
    Negotiate,
}

impl TlsVersion {
    /// TLS 1.0 and 1.1 are not offered by the TLS stack.
    pub fn is_supported(&self) -> bool {
        !matches!(self, TlsVersion::Tlsv1 | TlsVersion::Tlsv11)
    }
}

impl std::fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsVersion::Tlsv1 => write!(f, "tlsv1"),
            TlsVersion::Tlsv11 => write!(f, "tlsv1.1"),
            TlsVersion::Tlsv12 => write!(f, "tlsv1.2"),
            TlsVersion::Tlsv13 => write!(f, "tlsv1.3"),
            TlsVersion::Negotiate => write!(f, "negotiated"),
        }
    }
}

/// Encrypted transport for the broker connection.
///
/// With `insecure = true` the broker certificate and host name are not
/// checked and no certificate files are read.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_tls_material"))]
pub struct TlsConfig {
    pub enabled: bool,

    pub version: TlsVersion,

    pub insecure: bool,

    pub certs: CertsConfig,
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            enabled: false,
            version: TlsVersion::Tlsv12,
            insecure: false,
            certs: CertsConfig::default(),
        }
    }
}

/// Certificate directory plus the three file names inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertsConfig {
    pub certdir: PathBuf,
    pub cafile: String,
    pub certfile: String,
    pub keyfile: String,
}

impl Default for CertsConfig {
    fn default() -> Self {
        CertsConfig {
            certdir: PathBuf::from("/etc/imuflux/certs"),
            cafile: "ca.crt".to_string(),
            certfile: "client.crt".to_string(),
            keyfile: "client.key".to_string(),
        }
    }
}

impl CertsConfig {
    pub fn ca_path(&self) -> PathBuf {
        self.certdir.join(&self.cafile)
    }

    pub fn cert_path(&self) -> PathBuf {
        self.certdir.join(&self.certfile)
    }

    pub fn key_path(&self) -> PathBuf {
        self.certdir.join(&self.keyfile)
    }

    /// Client authentication is used only when both file names are given.
    pub fn has_client_auth(&self) -> bool {
        !self.certfile.is_empty() && !self.keyfile.is_empty()
    }
}

/// Schema-level TLS checks. File contents are checked later, when the client
/// is built.
fn validate_tls_material(tls: &TlsConfig) -> Result<(), ValidationError> {
    if !tls.enabled {
        return Ok(());
    }

    if !tls.version.is_supported() {
        return Err(ValidationError::new("unsupported_tls_version")
            .with_message(format!("TLS version {} is not supported", tls.version).into()));
    }

    if tls.insecure {
        return Ok(());
    }

    if !tls.certs.certdir.is_dir() {
        return Err(ValidationError::new("certdir_not_found").with_message(
            format!(
                "Certificate directory does not exist: {}",
                tls.certs.certdir.display()
            )
            .into(),
        ));
    }

    if tls.certs.cafile.is_empty() {
        return Err(ValidationError::new("missing_ca_cert")
            .with_message("CA certificate file name is required".into()));
    }

    if tls.certs.certfile.is_empty() != tls.certs.keyfile.is_empty() {
        return Err(ValidationError::new("incomplete_client_auth").with_message(
            "Both client certificate and key must be provided or neither".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(!config.tls.enabled);
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_credentials_require_both_halves() {
        let config = Config {
            username: "imu".into(),
            ..Default::default()
        };
        assert!(config.credentials().is_none());

        let config = Config {
            username: "imu".into(),
            password: "secret".into(),
            ..Default::default()
        };
        assert_eq!(config.credentials(), Some(("imu", "secret")));
    }

    #[test]
    fn test_empty_host_rejected() {
        let config = Config {
            host: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tls_missing_certdir_rejected() {
        let config = Config {
            tls: TlsConfig {
                enabled: true,
                insecure: false,
                certs: CertsConfig {
                    certdir: PathBuf::from("/nonexistent/imuflux/certs"),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Certificate directory does not exist"));
    }

    #[test]
    fn test_tls_insecure_skips_certdir_check() {
        let config = Config {
            tls: TlsConfig {
                enabled: true,
                insecure: true,
                certs: CertsConfig {
                    certdir: PathBuf::from("/nonexistent/imuflux/certs"),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tls_existing_certdir_accepted() {
        let dir = TempDir::new().unwrap();
        let tls = TlsConfig {
            enabled: true,
            certs: CertsConfig {
                certdir: dir.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(tls.validate().is_ok());
        assert_eq!(tls.certs.ca_path(), dir.path().join("ca.crt"));
    }

    #[test]
    fn test_tls_legacy_version_rejected() {
        let tls = TlsConfig {
            enabled: true,
            insecure: true,
            version: TlsVersion::Tlsv11,
            ..Default::default()
        };
        assert!(tls.validate().is_err());
    }

    #[test]
    fn test_partial_client_auth_rejected() {
        let dir = TempDir::new().unwrap();
        let tls = TlsConfig {
            enabled: true,
            certs: CertsConfig {
                certdir: dir.path().to_path_buf(),
                keyfile: String::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(tls.validate().is_err());
    }

    #[test]
    fn test_tls_version_parsing() {
        #[derive(Deserialize)]
        struct Wrapper {
            version: TlsVersion,
        }

        let parsed: Wrapper = toml::from_str(r#"version = "tlsv1.2""#).unwrap();
        assert_eq!(parsed.version, TlsVersion::Tlsv12);

        let parsed: Wrapper = toml::from_str(r#"version = "sslv3""#).unwrap();
        assert_eq!(parsed.version, TlsVersion::Negotiate);
    }
}

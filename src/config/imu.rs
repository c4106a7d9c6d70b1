//! Device identity, sensor sampling and metrics endpoint settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Longest sample period accepted, in seconds.
pub const MAX_SAMPLE_PERIOD_SECS: f64 = 3600.0;

/// Shortest sample period accepted, in seconds. Keeps one batch of
/// `ceil(1 / period)` records well inside a single UDP datagram.
pub const MIN_SAMPLE_PERIOD_SECS: f64 = 0.01;

/// `[device]`: identifies this gateway in topic names and the client id.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct DeviceConfig {
    #[validate(
        length(min = 1, max = 64, message = "Device name must be between 1 and 64 characters"),
        custom(function = "validate_topic_level")
    )]
    pub name: String,

    #[validate(
        length(min = 1, max = 64, message = "Device id must be between 1 and 64 characters"),
        custom(function = "validate_topic_level")
    )]
    pub id: String,
}

/// `[imu]`: which sensor to read, how often, and where batches are published.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ImuConfig {
    /// I2C bus number, opened as `/dev/i2c-<bus>`.
    pub bus: u8,

    /// 7-bit I2C address of the sensor.
    #[validate(range(
        min = 0x03,
        max = 0x77,
        message = "I2C address must be between 0x03 and 0x77"
    ))]
    pub address: u8,

    /// Seconds between sampling ticks. Also sizes the batch buffer.
    #[validate(custom(function = "validate_sample_period"))]
    pub sample_period: f64,

    /// Topic suffixes; each batch goes to `<name>/<id>/<topic>` for every entry.
    #[validate(
        length(min = 1, message = "At least one topic must be configured"),
        custom(function = "validate_topics")
    )]
    pub topics: Vec<String>,

    /// Settling delay after the sensor is opened.
    #[validate(range(max = 60000, message = "Startup settle must not exceed 60000 ms"))]
    pub startup_settle_ms: u64,

    /// Settling delay after switching to the external crystal.
    #[validate(range(max = 60000, message = "Calibration settle must not exceed 60000 ms"))]
    pub calibration_settle_ms: u64,
}

impl Default for ImuConfig {
    fn default() -> Self {
        ImuConfig {
            bus: 1,
            address: crate::core::sensor::bno055::DEFAULT_ADDRESS,
            sample_period: 0.1,
            topics: vec!["imu".to_string()],
            startup_settle_ms: 1000,
            calibration_settle_ms: 2000,
        }
    }
}

impl ImuConfig {
    pub fn bus_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/i2c-{}", self.bus))
    }
}

/// `[influx]`: InfluxDB UDP listener receiving the same batches.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct InfluxConfig {
    #[validate(length(min = 1, max = 255, message = "Host must be between 1 and 255 characters"))]
    pub host: String,

    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        InfluxConfig {
            host: "localhost".to_string(),
            port: 8089,
        }
    }
}

/// A single MQTT topic level: no separators, no wildcards.
fn validate_topic_level(value: &str) -> Result<(), ValidationError> {
    if value.contains(['/', '+', '#']) {
        let mut err = ValidationError::new("invalid_topic_level");
        err.message = Some(format!("'{}' must not contain '/', '+' or '#'", value).into());
        return Err(err);
    }
    Ok(())
}

fn validate_topics(topics: &[String]) -> Result<(), ValidationError> {
    for topic in topics {
        if topic.is_empty() || topic.starts_with('/') || topic.contains(['+', '#']) {
            let mut err = ValidationError::new("invalid_topic");
            err.message = Some(
                format!("Invalid topic '{}': must be non-empty, relative and wildcard-free", topic)
                    .into(),
            );
            return Err(err);
        }
    }
    Ok(())
}

fn validate_sample_period(period: f64) -> Result<(), ValidationError> {
    if !(MIN_SAMPLE_PERIOD_SECS..=MAX_SAMPLE_PERIOD_SECS).contains(&period) {
        let mut err = ValidationError::new("invalid_sample_period");
        err.message = Some(
            format!(
                "Sample period must be between {} and {} seconds, got {}",
                MIN_SAMPLE_PERIOD_SECS, MAX_SAMPLE_PERIOD_SECS, period
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imu_defaults_valid() {
        let imu = ImuConfig::default();
        assert!(imu.validate().is_ok());
        assert_eq!(imu.bus_path(), PathBuf::from("/dev/i2c-1"));
    }

    #[test]
    fn test_sample_period_bounds() {
        for period in [0.0, -1.0, f64::NAN, f64::INFINITY, 7200.0, 1e-9, 1e-300, 0.009] {
            let imu = ImuConfig {
                sample_period: period,
                ..Default::default()
            };
            assert!(imu.validate().is_err(), "period {period} should be rejected");
        }

        for period in [1.0 / 3.0, MIN_SAMPLE_PERIOD_SECS, MAX_SAMPLE_PERIOD_SECS] {
            let imu = ImuConfig {
                sample_period: period,
                ..Default::default()
            };
            assert!(imu.validate().is_ok(), "period {period} should be accepted");
        }
    }

    #[test]
    fn test_tiny_sample_period_rejected_on_load() {
        let err = crate::config::Config::parse(
            "[device]\nname = \"gw\"\nid = \"1\"\n[imu]\nsample_period = 1e-300\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Sample period must be between"));
    }

    #[test]
    fn test_topics_validation() {
        let empty = ImuConfig {
            topics: vec![],
            ..Default::default()
        };
        assert!(empty.validate().is_err());

        let wildcard = ImuConfig {
            topics: vec!["imu/#".into()],
            ..Default::default()
        };
        assert!(wildcard.validate().is_err());

        let nested = ImuConfig {
            topics: vec!["imu/raw".into()],
            ..Default::default()
        };
        assert!(nested.validate().is_ok());
    }

    #[test]
    fn test_device_identity_validation() {
        assert!(DeviceConfig::default().validate().is_err());

        let device = DeviceConfig {
            name: "imu-gw".into(),
            id: "0001".into(),
        };
        assert!(device.validate().is_ok());

        let device = DeviceConfig {
            name: "imu/gw".into(),
            id: "0001".into(),
        };
        assert!(device.validate().is_err());
    }

    #[test]
    fn test_address_out_of_range() {
        let imu = ImuConfig {
            address: 0x80,
            ..Default::default()
        };
        assert!(imu.validate().is_err());
    }
}

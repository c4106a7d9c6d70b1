//! Immutable runtime context built once from the loaded configuration.

use std::{fmt, time::Duration};

use crate::{
    config::{Config, ConfigError},
    core::buffer::capacity_for_period,
};

/// Device name and id, fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    name: String,
    id: String,
}

impl DeviceIdentity {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `<name>/<id>/<topic>`
    pub fn topic_for(&self, topic: &str) -> String {
        format!("{}/{}/{}", self.name, self.id, topic)
    }

    /// `<name>/<id>-IMU`
    pub fn client_id(&self) -> String {
        format!("{}/{}-IMU", self.name, self.id)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.id)
    }
}

/// InfluxDB UDP listener address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsEndpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for MetricsEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything the sampling loop and the fan-out sink need, shared by `Arc`.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    /// Prefix for every topic and the default client id.
    pub identity: DeviceIdentity,
    /// Topic suffixes, each expanded with `identity` on delivery.
    pub topics: Vec<String>,
    /// Time between the starts of two sampling ticks.
    pub sample_period: Duration,
    /// Records per batch, derived from `sample_period`.
    pub buffer_capacity: usize,
    /// Where every flushed batch is sent as one datagram.
    pub metrics_endpoint: MetricsEndpoint,
    /// Pause after the sensor is opened.
    pub startup_settle: Duration,
    /// Pause after switching to the external crystal.
    pub calibration_settle: Duration,
}

impl RuntimeContext {
    /// Derives the runtime values from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the sample period cannot be
    /// represented as a `Duration` (negative, NaN or overflowing).
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let sample_period = Duration::try_from_secs_f64(config.imu.sample_period).map_err(|e| {
            ConfigError::ValidationError(format!(
                "imu.sample_period {}: {}",
                config.imu.sample_period, e
            ))
        })?;

        Ok(Self {
            identity: DeviceIdentity::new(&config.device.name, &config.device.id),
            topics: config.imu.topics.clone(),
            sample_period,
            buffer_capacity: capacity_for_period(config.imu.sample_period),
            metrics_endpoint: MetricsEndpoint {
                host: config.influx.host.clone(),
                port: config.influx.port,
            },
            startup_settle: Duration::from_millis(config.imu.startup_settle_ms),
            calibration_settle: Duration::from_millis(config.imu.calibration_settle_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::imu::{DeviceConfig, ImuConfig};

    #[test]
    fn test_identity_formats() {
        let identity = DeviceIdentity::new("imu-gw", "0001");
        assert_eq!(identity.topic_for("imu"), "imu-gw/0001/imu");
        assert_eq!(identity.client_id(), "imu-gw/0001-IMU");
        assert_eq!(identity.to_string(), "imu-gw/0001");
    }

    #[test]
    fn test_context_from_config() {
        let config = Config {
            device: DeviceConfig {
                name: "imu-gw".into(),
                id: "0001".into(),
            },
            imu: ImuConfig {
                sample_period: 0.5,
                topics: vec!["imu".into(), "raw".into()],
                ..Default::default()
            },
            ..Default::default()
        };

        let ctx = RuntimeContext::from_config(&config).unwrap();
        assert_eq!(ctx.buffer_capacity, 2);
        assert_eq!(ctx.sample_period, Duration::from_millis(500));
        assert_eq!(ctx.topics.len(), 2);
        assert_eq!(ctx.metrics_endpoint.to_string(), "localhost:8089");
        assert_eq!(ctx.startup_settle, Duration::from_secs(1));
        assert_eq!(ctx.calibration_settle, Duration::from_secs(2));
    }

    #[test]
    fn test_tiny_period_capacity_is_bounded() {
        let config = Config {
            imu: ImuConfig {
                sample_period: 1e-300,
                ..Default::default()
            },
            ..Default::default()
        };

        let ctx = RuntimeContext::from_config(&config).unwrap();
        assert_eq!(ctx.buffer_capacity, crate::core::buffer::MAX_BATCH_RECORDS);
    }

    #[test]
    fn test_negative_period_rejected() {
        let config = Config {
            imu: ImuConfig {
                sample_period: -1.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(RuntimeContext::from_config(&config).is_err());
    }
}

use imuflux_mqtt::TransferError;
use thiserror::Error;

use crate::{config::ConfigError, core::sensor::SensorError};

/// Fatal errors that end the process.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error("Broker error: {0}")]
    Transport(#[from] TransferError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking sensor task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(String),
}

impl BridgeError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

impl From<tokio::task::JoinError> for BridgeError {
    fn from(err: tokio::task::JoinError) -> Self {
        BridgeError::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_error_display() {
        let err: BridgeError = ConfigError::ValidationError("device.name: empty".into()).into();
        assert_eq!(err.to_string(), "Validation error: device.name: empty");
        assert_eq!(err.exit_code(), 1);

        let err: BridgeError = TransferError::ConnectTimeout(10).into();
        assert_eq!(
            err.to_string(),
            "Broker error: No CONNACK from broker within 10 seconds"
        );
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_sensor_error_is_transparent() {
        let err: BridgeError = SensorError::init("/dev/i2c-1", "no ack").into();
        assert_eq!(
            err.to_string(),
            "Sensor initialization failed on /dev/i2c-1: no ack"
        );
    }
}

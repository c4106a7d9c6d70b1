use thiserror::Error;

use crate::core::record::MeasurementKind;

#[derive(Error, Debug)]
pub enum SensorError {
    /// The device did not come up: bus unavailable, no ACK, wrong chip id,
    /// or a failed configuration write.
    #[error("Sensor initialization failed on {bus}: {reason}")]
    Init { bus: String, reason: String },

    /// Bus failure while reading a vector.
    #[error("Failed to read {kind} vector")]
    Read {
        kind: MeasurementKind,
        #[source]
        source: std::io::Error,
    },

    /// Fewer bytes than a full vector.
    #[error("Short read for {kind} vector: expected {expected} bytes, got {actual}")]
    ShortRead {
        kind: MeasurementKind,
        expected: usize,
        actual: usize,
    },

    /// A register write outside initialization (calibration step).
    #[error("Failed to configure sensor: {0}")]
    Configure(#[source] std::io::Error),
}

impl SensorError {
    pub fn init(bus: impl Into<String>, reason: impl Into<String>) -> Self {
        SensorError::Init {
            bus: bus.into(),
            reason: reason.into(),
        }
    }
}

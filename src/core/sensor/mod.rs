//! Sensor access.
//!
//! `ImuSource` is what the sampling loop reads from. The shipped
//! implementation is the BNO055 driver on top of a `RegisterBus`, with
//! `LinuxI2cBus` as the bus on real hardware.
//!
//! All calls are blocking register I/O.

use crate::core::record::MeasurementKind;

pub mod bno055;
pub mod error;
#[cfg(target_os = "linux")]
pub mod i2c;

pub use bno055::Bno055;
pub use error::SensorError;

/// Produces calibrated vector triples on demand. Owns no buffering.
pub trait ImuSource: Send {
    /// Three components of `kind`, in the order the device reports them.
    fn read_vector(&mut self, kind: MeasurementKind) -> Result<[f64; 3], SensorError>;

    /// Switches the device to its external reference crystal. Required once
    /// after opening; the caller owns the settling delay that follows.
    fn use_external_crystal(&mut self) -> Result<(), SensorError>;
}

impl<T: ImuSource + ?Sized> ImuSource for Box<T> {
    fn read_vector(&mut self, kind: MeasurementKind) -> Result<[f64; 3], SensorError> {
        (**self).read_vector(kind)
    }

    fn use_external_crystal(&mut self) -> Result<(), SensorError> {
        (**self).use_external_crystal()
    }
}

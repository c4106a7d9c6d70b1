//! Register-level driver for the Bosch BNO055 9-axis orientation sensor.
//!
//! Only the subset the bridge needs: bring-up into NDOF fusion mode,
//! external crystal selection, and the three fused output vectors.

use std::{io, thread, time::Duration};

use tracing::{debug, info, trace};

use crate::core::{record::MeasurementKind, sensor::error::SensorError, sensor::ImuSource};

/// Address with the ADR pin low.
pub const DEFAULT_ADDRESS: u8 = 0x28;

/// Value of the chip id register on a BNO055.
pub const CHIP_ID: u8 = 0xA0;

const REG_CHIP_ID: u8 = 0x00;
const REG_PAGE_ID: u8 = 0x07;
const REG_EULER: u8 = 0x1A;
const REG_LINEAR_ACCEL: u8 = 0x28;
const REG_GRAVITY: u8 = 0x2E;
const REG_OPR_MODE: u8 = 0x3D;
const REG_PWR_MODE: u8 = 0x3E;
const REG_SYS_TRIGGER: u8 = 0x3F;

const MODE_CONFIG: u8 = 0x00;
const MODE_NDOF: u8 = 0x0C;
const POWER_NORMAL: u8 = 0x00;
const TRIGGER_RESET: u8 = 0x20;
const TRIGGER_EXT_CRYSTAL: u8 = 0x80;

const VECTOR_LEN: usize = 6;

/// How many times the chip id is polled after a reset.
const RESET_POLL_ATTEMPTS: usize = 100;

/// Byte-register access to a single device.
pub trait RegisterBus: Send {
    fn write_register(&mut self, register: u8, value: u8) -> io::Result<()>;

    /// Reads consecutive registers starting at `register` into `buf` and
    /// returns how many bytes were read.
    fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> io::Result<usize>;
}

/// Waits the device needs between register operations.
#[derive(Debug, Clone, Copy)]
pub struct Bno055Timing {
    /// After any operating mode change.
    pub mode_switch: Duration,
    /// Boot time before the first chip id check, and after a reset.
    pub boot: Duration,
    /// Interval between chip id polls after a reset.
    pub poll: Duration,
}

impl Default for Bno055Timing {
    fn default() -> Self {
        Self {
            mode_switch: Duration::from_millis(30),
            boot: Duration::from_millis(650),
            poll: Duration::from_millis(10),
        }
    }
}

impl Bno055Timing {
    /// No waiting at all; for buses that are not real hardware.
    pub fn immediate() -> Self {
        Self {
            mode_switch: Duration::ZERO,
            boot: Duration::ZERO,
            poll: Duration::ZERO,
        }
    }
}

/// A BNO055 in NDOF fusion mode on some register bus.
pub struct Bno055<B: RegisterBus> {
    bus: B,
    /// Bus description for error messages, e.g. `/dev/i2c-1@0x28`.
    label: String,
    timing: Bno055Timing,
}

impl<B: RegisterBus> Bno055<B> {
    /// Verifies the chip id, resets the device and enters NDOF mode.
    ///
    /// Blocks for the reset and mode-switch delays.
    ///
    /// # Arguments
    /// - `bus`: register access already bound to the sensor's address
    /// - `label`: bus description used in logs and errors
    ///
    /// # Errors
    /// - `SensorError::Init` on a bus failure or an unexpected chip id
    pub fn open(bus: B, label: impl Into<String>) -> Result<Self, SensorError> {
        Self::open_with_timing(bus, label, Bno055Timing::default())
    }

    /// Same as [`Bno055::open`] with explicit delays.
    pub fn open_with_timing(
        bus: B,
        label: impl Into<String>,
        timing: Bno055Timing,
    ) -> Result<Self, SensorError> {
        let mut sensor = Self {
            bus,
            label: label.into(),
            timing,
        };
        sensor.begin()?;
        info!("BNO055 initialized on {}", sensor.label);
        Ok(sensor)
    }

    fn begin(&mut self) -> Result<(), SensorError> {
        let mut chip_id = self.read_chip_id().map_err(|e| self.init_error(e))?;
        if chip_id != CHIP_ID {
            // The device may still be booting after power-up.
            thread::sleep(self.timing.boot);
            chip_id = self.read_chip_id().map_err(|e| self.init_error(e))?;
        }
        if chip_id != CHIP_ID {
            return Err(SensorError::init(
                &self.label,
                format!("chip id {:#04x}, expected {:#04x}", chip_id, CHIP_ID),
            ));
        }
        debug!("BNO055 chip id verified on {}", self.label);

        self.set_mode(MODE_CONFIG).map_err(|e| self.init_error(e))?;
        self.bus
            .write_register(REG_SYS_TRIGGER, TRIGGER_RESET)
            .map_err(|e| self.init_error(e))?;
        thread::sleep(self.timing.boot);
        self.wait_for_chip_id()?;

        self.bus
            .write_register(REG_PWR_MODE, POWER_NORMAL)
            .and_then(|_| self.bus.write_register(REG_PAGE_ID, 0x00))
            .and_then(|_| self.bus.write_register(REG_SYS_TRIGGER, 0x00))
            .map_err(|e| self.init_error(e))?;
        thread::sleep(self.timing.mode_switch);

        self.set_mode(MODE_NDOF).map_err(|e| self.init_error(e))
    }

    /// The chip does not answer while it resets; errors are expected until
    /// it is back.
    fn wait_for_chip_id(&mut self) -> Result<(), SensorError> {
        for _ in 0..RESET_POLL_ATTEMPTS {
            match self.read_chip_id() {
                Ok(CHIP_ID) => return Ok(()),
                Ok(other) => trace!("Chip id {:#04x} during reset", other),
                Err(e) => trace!("Chip not answering during reset: {}", e),
            }
            thread::sleep(self.timing.poll);
        }
        Err(SensorError::init(
            &self.label,
            "device did not come back after reset",
        ))
    }

    fn read_chip_id(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        let n = self.bus.read_registers(REG_CHIP_ID, &mut buf)?;
        if n != 1 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "empty chip id read",
            ));
        }
        Ok(buf[0])
    }

    fn set_mode(&mut self, mode: u8) -> io::Result<()> {
        self.bus.write_register(REG_OPR_MODE, mode)?;
        thread::sleep(self.timing.mode_switch);
        Ok(())
    }

    fn init_error(&self, e: io::Error) -> SensorError {
        SensorError::init(&self.label, e.to_string())
    }

    pub fn into_bus(self) -> B {
        self.bus
    }
}

fn vector_register(kind: MeasurementKind) -> (u8, f64) {
    match kind {
        // m/s^2
        MeasurementKind::LinearAcceleration => (REG_LINEAR_ACCEL, 100.0),
        MeasurementKind::Gravity => (REG_GRAVITY, 100.0),
        // degrees
        MeasurementKind::Orientation => (REG_EULER, 16.0),
    }
}

impl<B: RegisterBus> ImuSource for Bno055<B> {
    fn read_vector(&mut self, kind: MeasurementKind) -> Result<[f64; 3], SensorError> {
        let (register, scale) = vector_register(kind);
        let mut buf = [0u8; VECTOR_LEN];

        let n = self
            .bus
            .read_registers(register, &mut buf)
            .map_err(|source| SensorError::Read { kind, source })?;
        if n < VECTOR_LEN {
            return Err(SensorError::ShortRead {
                kind,
                expected: VECTOR_LEN,
                actual: n,
            });
        }

        let component =
            |i: usize| f64::from(i16::from_le_bytes([buf[2 * i], buf[2 * i + 1]])) / scale;
        let vector = [component(0), component(1), component(2)];
        trace!("{}: {:?}", kind, vector);
        Ok(vector)
    }

    fn use_external_crystal(&mut self) -> Result<(), SensorError> {
        self.set_mode(MODE_CONFIG).map_err(SensorError::Configure)?;
        self.bus
            .write_register(REG_SYS_TRIGGER, TRIGGER_EXT_CRYSTAL)
            .map_err(SensorError::Configure)?;
        thread::sleep(self.timing.mode_switch);
        self.set_mode(MODE_NDOF).map_err(SensorError::Configure)?;
        debug!("BNO055 on {} switched to external crystal", self.label);
        Ok(())
    }
}

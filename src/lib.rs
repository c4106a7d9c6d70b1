//! imuflux - BNO055 telemetry bridge to MQTT and InfluxDB
//!
//! Samples a BNO055 orientation sensor over I2C at a fixed period, encodes
//! the readings as InfluxDB line protocol, and delivers each batch both to
//! an MQTT broker and to an InfluxDB UDP listener.
//!
//! ## Modules
//!
//! * `config` - Configuration structures, loading, validation, and defaults.
//!   TOML files validated with the `validator` crate.
//!
//! * `core` - Runtime components:
//!   - BNO055 driver and Linux I2C bus
//!   - Record encoding and batch buffering
//!   - Fan-out delivery to broker and metrics endpoint
//!   - Sampling loop and its lifecycle state
//!
//! * `logger` - Logging initialization using `tracing`.
//!   Console output in several formats (compact, pretty, JSON), optional
//!   systemd journald and an optional error log file.
//!
//! The broker session itself lives in the `imuflux-mqtt` workspace crate.

pub mod config;
pub mod core;
pub mod logger;

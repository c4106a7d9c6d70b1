//! # imuflux-mqtt: broker session for the imuflux bridge
//!
//! A thin layer over `rumqttc` that gives the sampling loop exactly what it
//! needs from a broker:
//!
//! - validated configuration with credentials and TLS (rustls, optional
//!   client certificates, optional insecure mode);
//! - a connection kernel that drives the event loop on its own task, keeps
//!   polling after transient network errors, and publishes its state on a
//!   `watch` channel;
//! - lifecycle hooks (`LifecycleObserver`) for connect, PUBACK and
//!   disconnect;
//! - non-blocking QoS 1 publishes.
//!
//! # Quick Start
//!
//! ```ignore
//! use imuflux_mqtt::{Config, MqttManager};
//!
//! let mut mqtt = MqttManager::from_config(Config::default())
//!     .with_client_id("imu-gw/0001-IMU")
//!     .build()?;
//!
//! mqtt.start().await?;
//! let line = b"acceleration,type=linear,src=imu x=0.0,y=0.0,z=9.81 1\n";
//! mqtt.try_publish("imu-gw/0001/imu", line)?;
//! mqtt.shutdown().await?;
//! ```
//!
//! # Connection states
//!
//! ```text
//! Connecting --CONNACK--> Connected --network error--> Reconnecting
//!      ^                                                    |
//!      +-------------------- reconnect delay ---------------+
//!
//! any state --fatal error or shutdown--> Disconnected
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod observer;
pub mod state;

pub use client::ClientBuilder;
pub use config::{CertsConfig, Config, TlsConfig, TlsVersion};
pub use connection::ConnectionKernel;
pub use error::TransferError;
pub use manager::{MqttInstance, MqttManager, PublishHandle};
pub use observer::{LifecycleObserver, NoopObserver, SharedObserver};
pub use state::ConnectionState;

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, TransferError>;

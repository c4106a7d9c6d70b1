//! Wires configuration, broker session, metrics socket and sensor into one
//! sampling run.

use std::{future::Future, sync::Arc};

use imuflux_mqtt::MqttManager;
use tracing::{debug, info};
use validator::Validate;

#[cfg(target_os = "linux")]
use crate::{
    config::imu::ImuConfig,
    core::sensor::{i2c::LinuxI2cBus, Bno055},
};
use crate::{
    config::{Config, ConfigError},
    core::{
        context::RuntimeContext,
        error::BridgeError,
        lifecycle::LoggingObserver,
        sampler::SamplingLoop,
        sensor::{ImuSource, SensorError},
        sink::UdpMetricsSender,
    },
};

/// Runs the bridge until `shutdown` resolves or a fatal error occurs.
///
/// The whole configuration, TLS material included, is checked before `open`
/// is called, so a bad config never touches the sensor.
///
/// # Errors
/// - `BridgeError::Config` if validation fails
/// - `BridgeError::Transport` if the broker client cannot be built or connected
/// - `BridgeError::Io` if the metrics socket cannot be bound
/// - `BridgeError::Sensor` from opening or reading the sensor
pub async fn launch<S, F, Sd>(config: Config, open: F, shutdown: Sd) -> Result<(), BridgeError>
where
    S: ImuSource + 'static,
    F: FnOnce() -> Result<S, SensorError> + Send + 'static,
    Sd: Future<Output = ()>,
{
    config.validate().map_err(ConfigError::from)?;
    let ctx = Arc::new(RuntimeContext::from_config(&config)?);
    info!(
        "Device {} on {}, metrics to {}",
        ctx.identity,
        config.imu.bus_path().display(),
        ctx.metrics_endpoint
    );

    let mut mqtt = MqttManager::from_config(config.mqtt.clone())
        .with_client_id(ctx.identity.client_id())
        .with_observer(Arc::new(LoggingObserver::new(
            &config.mqtt.host,
            config.mqtt.port,
        )))
        .build()?;

    let metrics = UdpMetricsSender::bind(ctx.metrics_endpoint.clone()).await?;
    debug!("Transports ready, starting sampling loop");

    SamplingLoop::new(ctx)
        .run(open, &mut mqtt, Arc::new(metrics), shutdown)
        .await
}

/// Opens the BNO055 configured in `[imu]` on its Linux I2C bus.
#[cfg(target_os = "linux")]
pub fn bno055_opener(
    imu: &ImuConfig,
) -> impl FnOnce() -> Result<Bno055<LinuxI2cBus>, SensorError> + Send + 'static {
    let path = imu.bus_path();
    let address = imu.address;
    move || {
        let bus = LinuxI2cBus::open(&path, address)
            .map_err(|e| SensorError::init(path.display().to_string(), e.to_string()))?;
        let label = bus.label();
        Bno055::open(bus, label)
    }
}

//! Entry point for the broker session.
//!
//! `MqttManager` assembles the client and the connection kernel;
//! `MqttInstance` owns them and exposes the few operations the bridge needs:
//! start and wait for CONNACK, enqueue a QoS 1 publish, shut down.
//!
//! ```ignore
//! let mut mqtt = MqttManager::from_config(config)
//!     .with_client_id("imu-gw/0001-IMU")
//!     .with_observer(Arc::new(LoggingObserver))
//!     .build()?;
//! mqtt.start().await?;
//! mqtt.try_publish("imu-gw/0001/imu", payload)?;
//! mqtt.shutdown().await?;
//! ```

use std::{sync::Arc, time::Duration};

use rumqttc::{AsyncClient, QoS};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    client::ClientBuilder,
    config::Config,
    connection::ConnectionKernel,
    error::TransferError,
    observer::{NoopObserver, SharedObserver},
    state::ConnectionState,
};

/// Builder for an [`MqttInstance`].
pub struct MqttManager {
    config: Config,

    /// Used when the config carries no explicit client id.
    default_client_id: Option<String>,

    observer: SharedObserver,
}

impl MqttManager {
    /// Creates a manager from a loaded broker configuration.
    ///
    /// # Arguments
    /// - `config`: broker section, validated again in [`MqttManager::build`]
    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            default_client_id: None,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Client id used when `config.client_id` is unset.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.default_client_id = Some(client_id.into());
        self
    }

    /// Receives connect, publish acknowledgement and disconnect events.
    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Builds the client and the (not yet running) kernel. No network I/O.
    ///
    /// # Errors
    /// - `TransferError::ConfigError` if the configuration is invalid
    /// - `TransferError::ClientSetup` if the TLS material cannot be loaded
    pub fn build(self) -> Result<MqttInstance, TransferError> {
        let builder = ClientBuilder::from_config(&self.config, self.default_client_id.as_deref())?;
        info!(
            "MQTT client '{}' configured for {}:{} (TLS {})",
            builder.client_id(),
            self.config.host,
            self.config.port,
            if self.config.tls.enabled { "on" } else { "off" }
        );

        let (client, event_loop) = builder.build()?;
        let cancel = CancellationToken::new();
        let kernel = ConnectionKernel::new(
            client.clone(),
            event_loop,
            cancel.clone(),
            self.observer,
            Duration::from_secs(self.config.reconnect_delay),
        );
        let state_rx = kernel.subscribe_state();

        Ok(MqttInstance {
            client,
            kernel: Some(kernel),
            handle: None,
            cancel,
            state_rx,
            connection_timeout: Duration::from_secs(self.config.connection_timeout),
        })
    }
}

/// A broker session: the client plus the kernel that drives its event loop.
pub struct MqttInstance {
    client: AsyncClient,

    /// Present until `start` hands it to its own task.
    kernel: Option<ConnectionKernel>,

    handle: Option<JoinHandle<Result<(), TransferError>>>,

    cancel: CancellationToken,

    state_rx: watch::Receiver<ConnectionState>,

    connection_timeout: Duration,
}

impl MqttInstance {
    /// Spawns the kernel and waits for the first CONNACK.
    ///
    /// Fails if the broker refuses the session, if the kernel hits a fatal
    /// error, or if no CONNACK arrives within the connection timeout. The
    /// kernel is stopped before the error is returned.
    pub async fn start(&mut self) -> Result<(), TransferError> {
        let kernel = self
            .kernel
            .take()
            .ok_or_else(|| TransferError::ConnectionKernel("kernel already started".into()))?;

        self.handle = Some(tokio::spawn(kernel.run()));

        let mut state_rx = self.state_rx.clone();
        let outcome = tokio::time::timeout(
            self.connection_timeout,
            state_rx.wait_for(|s| {
                s.is_connected() || matches!(s, ConnectionState::Disconnected(_))
            }),
        )
        .await
        .map(|waited| waited.map(|state| state.clone()));

        match outcome {
            Ok(Ok(ConnectionState::Connected)) => {
                debug!("MQTT session established");
                Ok(())
            }
            Ok(Ok(state)) => {
                let err = self.join_kernel().await.err();
                Err(err.unwrap_or_else(|| TransferError::ConnectionKernel(state.details())))
            }
            Ok(Err(_)) => {
                let err = self.join_kernel().await.err();
                Err(err.unwrap_or_else(|| {
                    TransferError::ConnectionKernel("kernel stopped before connecting".into())
                }))
            }
            Err(_) => {
                self.cancel.cancel();
                if let Err(e) = self.join_kernel().await {
                    debug!("Kernel stopped with error after connect timeout: {}", e);
                }
                Err(TransferError::ConnectTimeout(self.connection_timeout.as_secs()))
            }
        }
    }

    /// Enqueues a QoS 1, non-retained publish without waiting for space or
    /// for the broker. Fails immediately when the request channel is full.
    pub fn try_publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransferError> {
        self.publish_handle().try_publish(topic, payload)
    }

    /// Cloneable, `Sync` publishing half of the session.
    pub fn publish_handle(&self) -> PublishHandle {
        PublishHandle {
            client: self.client.clone(),
        }
    }

    /// Last connection state reported by the kernel.
    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    /// Stops the kernel and waits for it. Safe to call more than once, and
    /// before `start`.
    pub async fn shutdown(&mut self) -> Result<(), TransferError> {
        self.cancel.cancel();
        self.kernel = None;
        self.join_kernel().await
    }

    async fn join_kernel(&mut self) -> Result<(), TransferError> {
        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| TransferError::ConnectionKernel(format!("kernel task failed: {e}")))?,
            None => Ok(()),
        }
    }
}

/// Publishing side of an `MqttInstance`, shareable across tasks.
#[derive(Clone)]
pub struct PublishHandle {
    client: AsyncClient,
}

impl PublishHandle {
    /// See [`MqttInstance::try_publish`].
    pub fn try_publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransferError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())?;
        Ok(())
    }
}

impl Drop for MqttInstance {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!("MqttInstance dropped without shutdown, cancelling kernel");
        }
        self.cancel.cancel();
    }
}

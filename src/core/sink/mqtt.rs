//! Broker side of the fan-out on top of `imuflux-mqtt`.

use std::sync::Arc;

use imuflux_mqtt::{MqttInstance, PublishHandle, TransferError};
use tracing::info;

use super::{BrokerPublisher, SinkResult};

#[async_trait::async_trait]
impl BrokerPublisher for PublishHandle {
    async fn publish(&self, topic: &str, payload: &[u8]) -> SinkResult {
        self.try_publish(topic, payload).map_err(|e| Box::new(e) as _)
    }
}

/// Broker session lifecycle as seen by the sampling loop.
#[async_trait::async_trait]
pub trait BrokerSession: Send {
    /// Starts background processing, waits for the CONNACK and returns the
    /// publisher for the running session.
    async fn connect(&mut self) -> Result<Arc<dyn BrokerPublisher>, TransferError>;

    /// Stops background processing and disconnects. Safe to call when
    /// `connect` was never called or failed.
    async fn disconnect(&mut self) -> Result<(), TransferError>;
}

#[async_trait::async_trait]
impl BrokerSession for MqttInstance {
    async fn connect(&mut self) -> Result<Arc<dyn BrokerPublisher>, TransferError> {
        self.start().await?;
        info!("Broker session ready");
        Ok(Arc::new(self.publish_handle()))
    }

    async fn disconnect(&mut self) -> Result<(), TransferError> {
        self.shutdown().await
    }
}

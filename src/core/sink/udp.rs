use tokio::net::UdpSocket;
use tracing::{debug, trace};

use super::{MetricsSender, SinkResult};
use crate::core::context::MetricsEndpoint;

/// Connectionless sender for the InfluxDB UDP listener.
///
/// The socket is bound once to an ephemeral port; every send resolves the
/// endpoint again so a changed DNS record is picked up without a restart.
#[derive(Debug)]
pub struct UdpMetricsSender {
    socket: UdpSocket,
    endpoint: MetricsEndpoint,
}

impl UdpMetricsSender {
    /// Binds an ephemeral local port. No datagram is sent yet.
    pub async fn bind(endpoint: MetricsEndpoint) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        debug!(
            "Metrics socket bound on {} for {}",
            socket.local_addr()?,
            endpoint
        );
        Ok(Self { socket, endpoint })
    }
}

#[async_trait::async_trait]
impl MetricsSender for UdpMetricsSender {
    async fn send(&self, payload: &[u8]) -> SinkResult {
        let sent = self
            .socket
            .send_to(payload, (self.endpoint.host.as_str(), self.endpoint.port))
            .await?;
        if sent != payload.len() {
            return Err(format!("datagram truncated: {} of {} bytes", sent, payload.len()).into());
        }
        trace!("Sent {} bytes to {}", sent, self.endpoint);
        Ok(())
    }

    fn target(&self) -> String {
        self.endpoint.to_string()
    }
}

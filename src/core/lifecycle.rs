//! Broker session events routed into the application log.

use imuflux_mqtt::LifecycleObserver;
use tracing::{debug, info, warn};

/// Default `LifecycleObserver`: logs every session event.
#[derive(Debug, Clone)]
pub struct LoggingObserver {
    broker: String,
}

impl LoggingObserver {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            broker: format!("{}:{}", host, port),
        }
    }
}

impl LifecycleObserver for LoggingObserver {
    fn on_connect(&self) {
        info!("Connected to MQTT broker {}", self.broker);
    }

    fn on_publish(&self, pkid: u16) {
        debug!("Broker {} acknowledged publish {}", self.broker, pkid);
    }

    fn on_disconnect(&self, reason: &str) {
        warn!("Disconnected from MQTT broker {}: {}", self.broker, reason);
    }
}

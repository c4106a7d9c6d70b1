//! Batch delivery to the broker and the metrics endpoint.
//!
//! `FanOutSink` hands one drained batch to both transports. Each transport
//! fails on its own: a broker error never stops the UDP send and the other
//! way round. Outcomes are collected in a `DeliveryReport` and logged; the
//! sampling loop never aborts on them.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    config::ConfigError,
    core::{
        context::DeviceIdentity,
        record::{concat, EncodedRecord},
    },
};

pub mod mqtt;
pub mod udp;

pub use mqtt::BrokerSession;
pub use udp::UdpMetricsSender;

/// Outcome of one transport call; the error is kept only for its message.
pub type SinkResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Enqueues one publish on the broker session.
#[async_trait::async_trait]
pub trait BrokerPublisher: Send + Sync {
    /// Best effort, QoS 1. Must not wait for the acknowledgement.
    async fn publish(&self, topic: &str, payload: &[u8]) -> SinkResult;
}

/// Sends one datagram to the metrics endpoint.
#[async_trait::async_trait]
pub trait MetricsSender: Send + Sync {
    /// Sends `payload` as a single datagram. A partial send is an error.
    async fn send(&self, payload: &[u8]) -> SinkResult;

    /// Where datagrams go, for logs and reports.
    fn target(&self) -> String;
}

/// Failure of one transport for one batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Enqueueing on the broker session failed for one topic.
    #[error("Broker publish to '{topic}' failed: {reason}")]
    Broker { topic: String, reason: String },

    /// The datagram could not be sent.
    #[error("Metrics send to {target} failed: {reason}")]
    Metrics { target: String, reason: String },
}

/// Outcome of delivering one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Records in the batch.
    pub records: usize,

    /// Payload size in bytes.
    pub bytes: usize,

    /// One entry per configured topic, in configuration order.
    pub broker: Vec<(String, Result<(), DeliveryFailure>)>,

    /// `None` when nothing was sent (empty batch).
    pub metrics: Option<Result<(), DeliveryFailure>>,
}

impl DeliveryReport {
    /// Every attempted send succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Failed sends, broker topics first, then the metrics endpoint.
    pub fn failures(&self) -> impl Iterator<Item = &DeliveryFailure> {
        self.broker
            .iter()
            .filter_map(|(_, outcome)| outcome.as_ref().err())
            .chain(self.metrics.iter().filter_map(|outcome| outcome.as_ref().err()))
    }

    /// Number of topics the batch was enqueued for.
    pub fn broker_delivered(&self) -> usize {
        self.broker.iter().filter(|(_, outcome)| outcome.is_ok()).count()
    }
}

/// Delivers each flushed batch to every broker topic and to the metrics
/// endpoint.
///
/// Both transports are trait objects, so the sampling loop can run against
/// in-memory doubles in tests.
#[derive(Clone)]
pub struct FanOutSink {
    broker: Arc<dyn BrokerPublisher>,
    metrics: Arc<dyn MetricsSender>,
}

impl FanOutSink {
    /// Creates a sink over an established broker session and a bound
    /// metrics socket.
    ///
    /// # Arguments
    /// - `broker`: publishing half of a connected session
    /// - `metrics`: sender for the InfluxDB UDP listener
    pub fn new(broker: Arc<dyn BrokerPublisher>, metrics: Arc<dyn MetricsSender>) -> Self {
        Self { broker, metrics }
    }

    /// Publishes the concatenated batch to `<name>/<id>/<topic>` for every
    /// topic and sends it once to the metrics endpoint.
    ///
    /// The two transports run concurrently. Transport failures are logged
    /// and recorded in the report, never returned.
    ///
    /// # Arguments
    /// - `batch`: drained records, in insertion order
    /// - `identity`: prefix for every topic
    /// - `topics`: topic suffixes, at least one
    ///
    /// # Returns
    /// - `Ok(DeliveryReport)`: per-transport outcomes; empty for an empty batch
    ///
    /// # Errors
    /// - `ConfigError::Config` if `topics` is empty
    pub async fn deliver(
        &self,
        batch: &[EncodedRecord],
        identity: &DeviceIdentity,
        topics: &[String],
    ) -> Result<DeliveryReport, ConfigError> {
        if topics.is_empty() {
            return Err(ConfigError::Config("no publish topics configured".into()));
        }
        if batch.is_empty() {
            return Ok(DeliveryReport::default());
        }

        let payload = concat(batch);
        let bytes = payload.as_bytes();

        let broker = async {
            let mut outcomes = Vec::with_capacity(topics.len());
            for topic in topics {
                let address = identity.topic_for(topic);
                let outcome = self.broker.publish(&address, bytes).await.map_err(|e| {
                    DeliveryFailure::Broker {
                        topic: address.clone(),
                        reason: e.to_string(),
                    }
                });
                outcomes.push((address, outcome));
            }
            outcomes
        };

        let metrics = async {
            self.metrics
                .send(bytes)
                .await
                .map_err(|e| DeliveryFailure::Metrics {
                    target: self.metrics.target(),
                    reason: e.to_string(),
                })
        };

        let (broker, metrics) = tokio::join!(broker, metrics);

        let report = DeliveryReport {
            records: batch.len(),
            bytes: bytes.len(),
            broker,
            metrics: Some(metrics),
        };

        for failure in report.failures() {
            warn!("{}", failure);
        }
        debug!(
            "Delivered {} records ({} bytes) to {}/{} topics, metrics {}",
            report.records,
            report.bytes,
            report.broker_delivered(),
            topics.len(),
            if matches!(report.metrics, Some(Ok(()))) { "ok" } else { "failed" }
        );

        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transports shared by the sink and sampler tests.

    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MockBroker {
        pub published: Mutex<Vec<(String, String)>>,
        pub fail: bool,
    }

    impl MockBroker {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn published(&self) -> Vec<(String, String)> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl BrokerPublisher for MockBroker {
        async fn publish(&self, topic: &str, payload: &[u8]) -> SinkResult {
            if self.fail {
                return Err("request queue full".into());
            }
            self.published.lock().unwrap().push((
                topic.to_string(),
                String::from_utf8_lossy(payload).into_owned(),
            ));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MockMetrics {
        pub sent: Mutex<Vec<String>>,
        pub fail: bool,
    }

    impl MockMetrics {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl MetricsSender for MockMetrics {
        async fn send(&self, payload: &[u8]) -> SinkResult {
            if self.fail {
                return Err("network unreachable".into());
            }
            self.sent
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(payload).into_owned());
            Ok(())
        }

        fn target(&self) -> String {
            "mock:8089".into()
        }
    }
}

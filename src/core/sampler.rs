//! The sampling loop.
//!
//! Opens and calibrates the sensor, connects the broker, then every sample
//! period reads the three vectors, encodes them into the batch buffer and
//! flushes the buffer through the `FanOutSink` whenever it fills up. A
//! sensor read error or a termination signal ends the loop; records still
//! pending at that point are discarded, never delivered.

use std::{future::Future, sync::Arc};

use tokio::{
    sync::watch,
    time::{sleep, Instant},
};
use tracing::{debug, error, info, trace, warn};

use crate::core::{
    buffer::BatchBuffer,
    context::RuntimeContext,
    error::BridgeError,
    record::{encode, Measurement, MeasurementKind, TimestampClock},
    sensor::{ImuSource, SensorError},
    sink::{BrokerSession, FanOutSink, MetricsSender},
    state::{LoopMonitor, LoopState},
};

/// One sampling run: startup, fixed-period ticks and teardown.
///
/// The loop owns the sensor and the batch buffer; state changes are
/// published through a `watch` channel.
pub struct SamplingLoop {
    ctx: Arc<RuntimeContext>,
    monitor: LoopMonitor,
}

impl SamplingLoop {
    /// Creates a loop in the `Starting` state.
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        Self {
            ctx,
            monitor: LoopMonitor::new(),
        }
    }

    /// Receiver for lifecycle transitions, usable while `run` is pending.
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.monitor.subscribe()
    }

    /// Runs until `shutdown` resolves or the sensor fails.
    ///
    /// In every case the broker has been disconnected, the sensor released
    /// and the state is `Stopped` when this returns.
    ///
    /// # Arguments
    /// - `open`: brings the sensor up; runs on the blocking pool
    /// - `broker`: session connected once the sensor has settled
    /// - `metrics`: sender for the UDP copy of every batch
    /// - `shutdown`: resolves on a termination request
    ///
    /// # Errors
    /// - `BridgeError::Sensor` if the sensor cannot be opened or a read fails
    /// - `BridgeError::Transport` if the broker session cannot be established
    /// - `BridgeError::Task` if a blocking sensor task panicked
    pub async fn run<S, F, Sd>(
        self,
        open: F,
        broker: &mut dyn BrokerSession,
        metrics: Arc<dyn MetricsSender>,
        shutdown: Sd,
    ) -> Result<(), BridgeError>
    where
        S: ImuSource + 'static,
        F: FnOnce() -> Result<S, SensorError> + Send + 'static,
        Sd: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let started = tokio::select! {
            biased;
            _ = &mut shutdown => None,
            result = self.start(open, &mut *broker, metrics) => Some(result),
        };

        let (mut source, sink) = match started {
            Some(Ok(running)) => running,
            Some(Err(e)) => {
                error!("Startup failed: {}", e);
                self.disconnect(broker).await;
                self.monitor.set_state(LoopState::Stopped);
                return Err(e);
            }
            None => {
                info!("Termination requested during startup");
                self.monitor.set_state(LoopState::ShuttingDown);
                self.disconnect(broker).await;
                self.monitor.set_state(LoopState::Stopped);
                return Ok(());
            }
        };

        self.monitor.set_state(LoopState::Running);
        info!(
            "Sampling every {:?}, {} records per batch, topics {:?}",
            self.ctx.sample_period, self.ctx.buffer_capacity, self.ctx.topics
        );

        let mut buffer = BatchBuffer::new(self.ctx.buffer_capacity);
        let clock = TimestampClock::new();

        let outcome = loop {
            let tick = Instant::now();
            if let Err(e) = self.tick(&mut source, &clock, &mut buffer, &sink).await {
                break Err(e);
            }

            let pause = self.ctx.sample_period.saturating_sub(tick.elapsed());
            tokio::select! {
                biased;
                _ = &mut shutdown => break Ok(()),
                _ = sleep(pause) => {}
            }
        };

        match &outcome {
            Ok(()) => {
                info!("Termination signal received, shutting down");
                self.monitor.set_state(LoopState::ShuttingDown);
            }
            Err(e) => {
                error!("Sampling stopped: {}", e);
                self.monitor.set_state(LoopState::Faulted(e.to_string()));
            }
        }

        let pending = buffer.drain_all();
        if !pending.is_empty() {
            warn!("Discarding {} undelivered records", pending.len());
        }

        self.disconnect(broker).await;
        drop(source);
        debug!("Sensor released");

        self.monitor.set_state(LoopState::Stopped);
        info!("Sampling loop stopped");
        outcome
    }

    async fn start<S, F>(
        &self,
        open: F,
        broker: &mut dyn BrokerSession,
        metrics: Arc<dyn MetricsSender>,
    ) -> Result<(S, FanOutSink), BridgeError>
    where
        S: ImuSource + 'static,
        F: FnOnce() -> Result<S, SensorError> + Send + 'static,
    {
        info!("Opening IMU sensor");
        let source = tokio::task::spawn_blocking(open).await??;
        debug!("Sensor open, settling for {:?}", self.ctx.startup_settle);
        sleep(self.ctx.startup_settle).await;

        let source = tokio::task::spawn_blocking(move || {
            let mut source = source;
            source.use_external_crystal().map(|()| source)
        })
        .await??;
        debug!("External crystal enabled, settling for {:?}", self.ctx.calibration_settle);
        sleep(self.ctx.calibration_settle).await;
        info!("Sensor calibrated");

        let publisher = broker.connect().await?;
        Ok((source, FanOutSink::new(publisher, metrics)))
    }

    /// One sample period: read, encode and buffer the three vectors,
    /// flushing whenever the buffer is full.
    async fn tick<S: ImuSource>(
        &self,
        source: &mut S,
        clock: &TimestampClock,
        buffer: &mut BatchBuffer,
        sink: &FanOutSink,
    ) -> Result<(), BridgeError> {
        for kind in MeasurementKind::ALL {
            let raw = source.read_vector(kind)?;
            let record = encode(&Measurement::from_vector(kind, raw, clock.now_ns()));
            trace!("{}", record.as_str().trim_end());

            if let Err(record) = buffer.try_insert(record) {
                self.flush(buffer, sink).await?;
                if buffer.try_insert(record).is_err() {
                    warn!("Dropping {} record, buffer still full after flush", kind);
                }
            }
        }

        if buffer.is_full() {
            self.flush(buffer, sink).await?;
        }
        Ok(())
    }

    async fn flush(&self, buffer: &mut BatchBuffer, sink: &FanOutSink) -> Result<(), BridgeError> {
        let batch = buffer.drain_all();
        let report = sink
            .deliver(&batch, &self.ctx.identity, &self.ctx.topics)
            .await?;
        if report.is_complete() {
            trace!("Flushed {} records", report.records);
        } else {
            debug!(
                "Flushed {} records with {} failed sends",
                report.records,
                report.failures().count()
            );
        }
        Ok(())
    }

    async fn disconnect(&self, broker: &mut dyn BrokerSession) {
        if let Err(e) = broker.disconnect().await {
            warn!("Broker disconnect failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use imuflux_mqtt::TransferError;
    use tracing_test::traced_test;

    use super::*;
    use crate::core::{
        context::{DeviceIdentity, MetricsEndpoint},
        sink::{
            testing::{MockBroker, MockMetrics},
            BrokerPublisher,
        },
    };

    fn context(period: Duration, capacity: usize) -> Arc<RuntimeContext> {
        Arc::new(RuntimeContext {
            identity: DeviceIdentity::new("imu-gw", "0001"),
            topics: vec!["imu".into()],
            sample_period: period,
            buffer_capacity: capacity,
            metrics_endpoint: MetricsEndpoint {
                host: "localhost".into(),
                port: 8089,
            },
            startup_settle: Duration::from_secs(1),
            calibration_settle: Duration::from_secs(2),
        })
    }

    /// Returns fixed vectors; fails the read with index `fail_at`.
    struct MockSource {
        reads: Arc<AtomicUsize>,
        fail_at: Option<usize>,
    }

    impl ImuSource for MockSource {
        fn read_vector(&mut self, kind: MeasurementKind) -> Result<[f64; 3], SensorError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(n) {
                return Err(SensorError::Read {
                    kind,
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "no ack"),
                });
            }
            Ok(match kind {
                MeasurementKind::LinearAcceleration => [0.12, -0.03, 0.0],
                MeasurementKind::Gravity => [0.0, 0.0, 9.81],
                MeasurementKind::Orientation => [359.9375, 2.0, -1.5],
            })
        }

        fn use_external_crystal(&mut self) -> Result<(), SensorError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockSession {
        publisher: Arc<MockBroker>,
        connects: usize,
        disconnects: usize,
        refuse: bool,
    }

    #[async_trait::async_trait]
    impl BrokerSession for MockSession {
        async fn connect(&mut self) -> Result<Arc<dyn BrokerPublisher>, TransferError> {
            self.connects += 1;
            if self.refuse {
                return Err(TransferError::ConnectTimeout(10));
            }
            Ok(self.publisher.clone())
        }

        async fn disconnect(&mut self) -> Result<(), TransferError> {
            self.disconnects += 1;
            Ok(())
        }
    }

    fn opener(
        fail_at: Option<usize>,
    ) -> (
        Arc<AtomicUsize>,
        impl FnOnce() -> Result<MockSource, SensorError> + Send + 'static,
    ) {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = reads.clone();
        (reads, move || {
            Ok(MockSource {
                reads: counter,
                fail_at,
            })
        })
    }

    fn lines(payload: &str) -> Vec<&str> {
        payload.lines().collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_two_flushes_once_per_tick() {
        let ctx = context(Duration::from_millis(500), 2);
        let mut session = MockSession::default();
        let metrics = Arc::new(MockMetrics::default());
        let (reads, open) = opener(None);

        let sampler = SamplingLoop::new(ctx);
        let state = sampler.subscribe();
        // Settling takes 3 s; stop halfway through the first pause.
        let shutdown = sleep(Duration::from_millis(3_250));

        sampler
            .run(open, &mut session, metrics.clone(), shutdown)
            .await
            .unwrap();

        assert_eq!(reads.load(Ordering::SeqCst), 3);

        let published = session.publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "imu-gw/0001/imu");

        let batch = lines(&published[0].1);
        assert_eq!(batch.len(), 2);
        assert!(batch[0].starts_with("acceleration,type=linear,src=imu x=0.12,y=-0.03,z=0.0 "));
        assert!(batch[1].starts_with("acceleration,type=gravity,src=imu x=0.0,y=0.0,z=9.81 "));

        // The orientation record was still pending and is not delivered.
        assert_eq!(metrics.sent(), vec![published[0].1.clone()]);

        assert_eq!(session.connects, 1);
        assert_eq!(session.disconnects, 1);
        assert_eq!(*state.borrow(), LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_period_third_second_flushes_full_tick() {
        let ctx = context(Duration::from_secs_f64(1.0 / 3.0), 3);
        let mut session = MockSession::default();
        let metrics = Arc::new(MockMetrics::default());
        let (_, open) = opener(None);

        let shutdown = sleep(Duration::from_millis(3_100));
        SamplingLoop::new(ctx)
            .run(open, &mut session, metrics.clone(), shutdown)
            .await
            .unwrap();

        let published = session.publisher.published();
        assert_eq!(published.len(), 1);

        let batch = lines(&published[0].1);
        assert_eq!(batch.len(), 3);
        assert!(batch[2]
            .starts_with("orientation,type=euler,src=imu yaw=359.9375,pitch=-1.5,roll=2.0 "));

        let stamps: Vec<u64> = batch
            .iter()
            .map(|line| line.rsplit(' ').next().unwrap().parse().unwrap())
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));

        assert_eq!(metrics.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_sampling_at_fixed_period() {
        let ctx = context(Duration::from_millis(500), 2);
        let mut session = MockSession::default();
        let (reads, open) = opener(None);

        // Ticks at 3.0, 3.5, 4.0 and 4.5 s.
        let shutdown = sleep(Duration::from_millis(4_750));
        SamplingLoop::new(ctx)
            .run(open, &mut session, Arc::new(MockMetrics::default()), shutdown)
            .await
            .unwrap();

        assert_eq!(reads.load(Ordering::SeqCst), 12);
        // 12 records, capacity 2: every record lands in a delivered batch.
        let delivered: usize = session
            .publisher
            .published()
            .iter()
            .map(|(_, payload)| lines(payload).len())
            .sum();
        assert_eq!(delivered, 12);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_read_error_faults_and_discards_pending() {
        let ctx = context(Duration::from_millis(500), 2);
        let mut session = MockSession::default();
        let metrics = Arc::new(MockMetrics::default());
        // Gravity read of the first tick fails, one record is pending.
        let (_, open) = opener(Some(1));

        let sampler = SamplingLoop::new(ctx);
        let state = sampler.subscribe();
        let err = sampler
            .run(open, &mut session, metrics.clone(), std::future::pending::<()>())
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Sensor(SensorError::Read { .. })));
        assert_eq!(err.exit_code(), 1);
        assert!(session.publisher.published().is_empty());
        assert!(metrics.sent().is_empty());
        assert_eq!(session.disconnects, 1);
        assert_eq!(*state.borrow(), LoopState::Stopped);

        assert!(logs_contain("Running -> Faulted: Failed to read gravity vector"));
        assert!(logs_contain("Discarding 1 undelivered records"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_never_connects_broker() {
        let ctx = context(Duration::from_millis(100), 10);
        let mut session = MockSession::default();

        let err = SamplingLoop::new(ctx)
            .run(
                || -> Result<MockSource, SensorError> {
                    Err(SensorError::init("/dev/i2c-1", "chip id 0x00, expected 0xa0"))
                },
                &mut session,
                Arc::new(MockMetrics::default()),
                std::future::pending::<()>(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Sensor(SensorError::Init { .. })));
        assert_eq!(session.connects, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broker_refusal_is_fatal() {
        let ctx = context(Duration::from_millis(100), 10);
        let mut session = MockSession {
            refuse: true,
            ..Default::default()
        };
        let (reads, open) = opener(None);

        let err = SamplingLoop::new(ctx)
            .run(open, &mut session, Arc::new(MockMetrics::default()), std::future::pending::<()>())
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Transport(TransferError::ConnectTimeout(10))));
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert_eq!(session.disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_shutdown_during_settling() {
        let ctx = context(Duration::from_millis(100), 10);
        let mut session = MockSession::default();
        let (reads, open) = opener(None);

        let shutdown = sleep(Duration::from_millis(500));
        SamplingLoop::new(ctx)
            .run(open, &mut session, Arc::new(MockMetrics::default()), shutdown)
            .await
            .unwrap();

        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert_eq!(session.connects, 0);
        assert!(logs_contain("Termination requested during startup"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_visible_while_running() {
        let ctx = context(Duration::from_millis(100), 10);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sampler = SamplingLoop::new(ctx);
        let mut state = sampler.subscribe();

        let recorder = {
            let seen = seen.clone();
            tokio::spawn(async move {
                while state.changed().await.is_ok() {
                    let current = state.borrow_and_update().clone();
                    seen.lock().unwrap().push(current);
                }
            })
        };

        let mut session = MockSession::default();
        let (_, open) = opener(None);
        sampler
            .run(
                open,
                &mut session,
                Arc::new(MockMetrics::default()),
                sleep(Duration::from_millis(3_050)),
            )
            .await
            .unwrap();
        recorder.await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&LoopState::Running));
        assert_eq!(seen.last(), Some(&LoopState::Stopped));
    }
}

//! Connection kernel: drives the rumqttc event loop on its own task.
//!
//! ```text
//! sampling task --try_publish--> AsyncClient --channel--> ConnectionKernel
//!                                                          | poll()
//!                                                          v
//!                                                  EventLoop (TCP/TLS)
//! ```
//!
//! The kernel reports every transition on a `watch` channel and forwards
//! session events to a `LifecycleObserver`. Transient network errors are
//! followed by a fixed pause and another poll, which makes rumqttc reconnect.
//! Fatal errors end the task.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{error::TransferError, observer::SharedObserver, state::ConnectionState};

/// Upper bound on flushing the DISCONNECT packet at shutdown.
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Drives the `rumqttc` event loop until cancelled or a fatal error occurs,
/// publishing every state change.
pub struct ConnectionKernel {
    client: AsyncClient,

    event_loop: EventLoop,

    cancel: CancellationToken,

    observer: SharedObserver,

    /// Pause between a transient error and the next poll.
    reconnect_delay: Duration,

    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionKernel {
    pub fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        cancel: CancellationToken,
        observer: SharedObserver,
        reconnect_delay: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            client,
            event_loop,
            cancel,
            observer,
            reconnect_delay,
            state_tx,
        }
    }

    /// The receiver sees the current state immediately.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn current_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn update_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });

        if changed {
            info!("MQTT connection state changed to: {}", state);
        }
    }

    /// Runs until cancelled (returns `Ok`) or until a fatal error.
    pub async fn run(mut self) -> Result<(), TransferError> {
        self.update_state(ConnectionState::Connecting);
        info!("Starting MQTT event loop...");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Shutdown signal received, disconnecting from broker...");
                    self.disconnect().await;
                    info!("Connection kernel shutdown completed");
                    return Ok(());
                }

                polled = self.event_loop.poll() => match polled {
                    Ok(event) => self.handle_event(event),
                    Err(e) => {
                        let reason = root_cause(&e);

                        if is_fatal_error(&e) {
                            error!("Fatal MQTT connection error: {}", reason);
                            self.update_state(ConnectionState::Disconnected(reason.clone()));
                            self.observer.on_disconnect(&reason);
                            return Err(TransferError::from(e));
                        }

                        if self.current_state().is_connected() {
                            self.observer.on_disconnect(&reason);
                        }

                        warn!(
                            "MQTT connection error, retrying in {:.2} seconds: {}",
                            self.reconnect_delay.as_secs_f64(),
                            reason
                        );
                        self.update_state(ConnectionState::Reconnecting(
                            self.reconnect_delay.as_secs_f64(),
                        ));

                        tokio::select! {
                            _ = self.cancel.cancelled() => {}
                            _ = tokio::time::sleep(self.reconnect_delay) => {
                                self.update_state(ConnectionState::Connecting);
                            }
                        }
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    debug!("CONNACK received");
                    self.update_state(ConnectionState::Connected);
                    self.observer.on_connect();
                }
            }
            Event::Incoming(Packet::PubAck(ack)) => {
                trace!("PUBACK for packet {}", ack.pkid);
                self.observer.on_publish(ack.pkid);
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
                self.update_state(ConnectionState::Disconnected(
                    "Disconnected by broker".into(),
                ));
                self.observer.on_disconnect("Disconnected by broker");
            }
            Event::Incoming(packet) => trace!("Incoming packet: {:?}", packet),
            Event::Outgoing(outgoing) => trace!("Outgoing packet: {:?}", outgoing),
        }
    }

    /// Queues DISCONNECT and polls until it has been written, or the flush
    /// timeout runs out. Failures are logged only; the socket closes either way.
    async fn disconnect(&mut self) {
        if self.current_state().is_connected() {
            if let Err(e) = self.client.try_disconnect() {
                warn!("Could not queue disconnect packet: {}", e);
            } else {
                let flushed = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
                    loop {
                        match self.event_loop.poll().await {
                            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                            Ok(_) => continue,
                            Err(e) => {
                                debug!("Event loop closed while disconnecting: {}", e);
                                break;
                            }
                        }
                    }
                })
                .await;

                if flushed.is_err() {
                    warn!("Timed out flushing disconnect packet");
                }
            }
        }

        self.update_state(ConnectionState::Disconnected("shutdown".into()));
        self.observer.on_disconnect("shutdown");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Fatal,
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        // Bad certificates or crypto mismatch will not fix themselves.
        ConnectionError::Tls(_) => Fatal,
        ConnectionError::MqttState(_) => Fatal,
        ConnectionError::NotConnAck(_) => Fatal,
        ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::InvalidData => Fatal,
            _ => Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,

        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,
            _ => Reconnect,
        },

        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

pub(crate) fn is_fatal_error(err: &ConnectionError) -> bool {
    matches!(classify_connection_error(err), Disposition::Fatal)
}

/// Innermost message of an error chain, without surrounding quotes.
fn root_cause(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use tracing_test::traced_test;

    use super::*;
    use crate::{
        client::ClientBuilder,
        observer::{LifecycleObserver, NoopObserver},
    };

    #[derive(Default)]
    struct DisconnectCounter(AtomicUsize);

    impl LifecycleObserver for DisconnectCounter {
        fn on_disconnect(&self, _reason: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn kernel_for(
        port: u16,
        observer: SharedObserver,
        cancel: CancellationToken,
    ) -> ConnectionKernel {
        let (client, event_loop) = ClientBuilder::new("kernel_test", "127.0.0.1", port, 10)
            .build()
            .unwrap();
        ConnectionKernel::new(client, event_loop, cancel, observer, Duration::from_secs(1))
    }

    #[test]
    fn test_is_fatal_error_detection() {
        let refused = ConnectionError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(!is_fatal_error(&refused));

        let denied = ConnectionError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "permission denied",
        ));
        assert!(is_fatal_error(&denied));

        assert!(is_fatal_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword
        )));
        assert!(!is_fatal_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::ServiceUnavailable
        )));
        assert!(!is_fatal_error(&ConnectionError::NetworkTimeout));
    }

    #[test]
    fn test_root_cause_strips_quotes() {
        let err = io::Error::new(io::ErrorKind::Other, "\"broker gone\"");
        assert_eq!(root_cause(&err), "broker gone");
    }

    #[tokio::test]
    async fn test_state_subscription() {
        let kernel = kernel_for(1883, Arc::new(NoopObserver), CancellationToken::new());
        let mut state_rx = kernel.subscribe_state();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);

        kernel.update_state(ConnectionState::Connected);
        state_rx.changed().await.unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_cancelled_before_connect_shuts_down_cleanly() {
        let cancel = CancellationToken::new();
        let counter = Arc::new(DisconnectCounter::default());
        let kernel = kernel_for(1883, counter.clone(), cancel.clone());
        let state_rx = kernel.subscribe_state();

        cancel.cancel();
        kernel.run().await.unwrap();

        assert_eq!(
            *state_rx.borrow(),
            ConnectionState::Disconnected("shutdown".into())
        );
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(logs_contain("MQTT connection state changed to: Disconnected (shutdown)"));
        assert!(logs_contain("Connection kernel shutdown completed"));
    }

    #[tokio::test]
    async fn test_refused_connection_enters_reconnecting() {
        let cancel = CancellationToken::new();
        // Nothing listens on port 1.
        let kernel = kernel_for(1, Arc::new(NoopObserver), cancel.clone());
        let mut state_rx = kernel.subscribe_state();
        let handle = tokio::spawn(kernel.run());

        let reached = tokio::time::timeout(
            Duration::from_secs(5),
            state_rx.wait_for(|s| matches!(s, ConnectionState::Reconnecting(_))),
        )
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
        assert!(reached);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}

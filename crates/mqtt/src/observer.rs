//! Hooks invoked by the connection kernel on session events.
//!
//! The kernel holds the observer behind an `Arc` and calls it from its own
//! task, so implementations must be cheap and must not block.

use std::sync::Arc;

/// Receives broker session events.
///
/// Every method has a no-op default; implement only what you need.
pub trait LifecycleObserver: Send + Sync {
    /// CONNACK with a success code was received.
    fn on_connect(&self) {}

    /// The broker acknowledged the QoS 1 publish with this packet id.
    fn on_publish(&self, _pkid: u16) {}

    /// The session ended or dropped; `reason` is human readable.
    fn on_disconnect(&self, _reason: &str) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {}

/// Observer shared between the manager and the kernel task.
pub type SharedObserver = Arc<dyn LifecycleObserver>;

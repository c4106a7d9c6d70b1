//! Broker session state as published by the connection kernel.
//!
//! The kernel owns the only sender; everyone else observes through a
//! `watch::Receiver<ConnectionState>` obtained from the session.

use std::fmt;

/// Current state of the broker session.
///
/// Lifecycle:
/// - `Connecting` -> `Connected` once CONNACK arrives
/// - `Connected` -> `Reconnecting` after a transient network error
/// - any state -> `Disconnected` on a fatal error or at shutdown
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// CONNECT sent (or about to be), waiting for CONNACK.
    Connecting,

    /// CONNACK received; publishes are flowing.
    Connected,

    /// Session is over. Carries the reason (fatal error text or "shutdown").
    Disconnected(String),

    /// Waiting this many seconds before polling the event loop again.
    Reconnecting(f64),
}

impl ConnectionState {
    /// Short, allocation-free name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
        }
    }

    /// Reason for `Disconnected`, delay for `Reconnecting`, empty otherwise.
    pub fn details(&self) -> String {
        match self {
            ConnectionState::Connecting | ConnectionState::Connected => String::new(),
            ConnectionState::Disconnected(reason) => reason.clone(),
            ConnectionState::Reconnecting(seconds) => format!("in {seconds} seconds"),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True while a connection attempt is still in progress.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting(_)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

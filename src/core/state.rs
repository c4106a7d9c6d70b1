//! Sampling loop lifecycle state.
//!
//! The loop owns a `LoopMonitor` and reports every transition through it;
//! other tasks (and tests) observe the state through a `watch` receiver.

use std::fmt;

use tokio::sync::watch;
use tracing::debug;

/// Lifecycle of one sampling run.
///
/// ```text
/// Starting -> Running -> ShuttingDown -> Stopped
///                |
///                +----> Faulted ------> Stopped
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    /// Opening the sensor, calibrating, connecting the broker.
    Starting,
    Running,
    /// Unrecoverable error; carries the reason.
    Faulted(String),
    /// Termination signal received.
    ShuttingDown,
    /// Terminal.
    Stopped,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Starting => "Starting",
            LoopState::Running => "Running",
            LoopState::Faulted(_) => "Faulted",
            LoopState::ShuttingDown => "ShuttingDown",
            LoopState::Stopped => "Stopped",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, LoopState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Stopped)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: &LoopState) -> bool {
        use LoopState::*;

        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Faulted(_))
                | (Starting, ShuttingDown)
                | (Starting, Stopped)
                | (Running, Faulted(_))
                | (Running, ShuttingDown)
                | (Faulted(_), Stopped)
                | (ShuttingDown, Stopped)
        )
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Faulted(reason) => write!(f, "Faulted: {}", reason),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Publishes `LoopState` transitions.
#[derive(Debug, Clone)]
pub struct LoopMonitor {
    state_tx: watch::Sender<LoopState>,
}

impl LoopMonitor {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(LoopState::Starting);
        Self { state_tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> LoopState {
        self.state_tx.borrow().clone()
    }

    /// Records a transition. Illegal transitions are ignored and logged,
    /// so `Stopped` can never be left.
    pub fn set_state(&self, state: LoopState) -> bool {
        let old_state = self.current_state();
        if !old_state.can_transition_to(&state) {
            debug!("Ignoring loop state change {} -> {}", old_state, state);
            return false;
        }

        self.state_tx.send_replace(state.clone());
        debug!("Loop state changed: {} -> {}", old_state, state);
        true
    }
}

impl Default for LoopMonitor {
    fn default() -> Self {
        Self::new()
    }
}

//! Bus and consumer group status.
//!
//! The Lifecycle Manager owns the only [`StatusWriter`]. Every other component
//! receives a [`StatusView`], which can read the status but not change it.

use serde::Serialize;
use std::fmt;
use tokio::sync::watch;

/// Connection state of the whole bus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BusState {
    /// `initialize` completed and `shutdown` has not run since
    pub initialized: bool,
    /// Producer and admin clients are connected
    pub connected: bool,
}

/// Creates the status channel: the writer for the Lifecycle Manager and a view
/// for everyone else.
#[must_use]
pub fn status_channel() -> (StatusWriter, StatusView) {
    let (tx, rx) = watch::channel(BusState::default());
    (StatusWriter { tx }, StatusView { rx })
}

/// Mutating half of the bus status.
#[derive(Debug)]
pub struct StatusWriter {
    tx: watch::Sender<BusState>,
}

impl StatusWriter {
    /// Replace the current state.
    pub fn set(&self, state: BusState) {
        self.tx.send_replace(state);
    }

    /// Another read-only view of the same status.
    #[must_use]
    pub fn view(&self) -> StatusView {
        StatusView {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only view of the bus status.
#[derive(Clone, Debug)]
pub struct StatusView {
    rx: watch::Receiver<BusState>,
}

impl StatusView {
    /// Snapshot of the current state.
    #[must_use]
    pub fn current(&self) -> BusState {
        *self.rx.borrow()
    }

    /// Returns true once `initialize` has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.rx.borrow().initialized
    }

    /// Returns true while the producer and admin clients are connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.rx.borrow().connected
    }
}

/// Consumer group state machine.
///
/// `Stopped -> Connecting -> Subscribed -> Running -> Draining -> Stopped`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    /// Not pulling; the consumer is disconnected
    #[default]
    Stopped,
    /// Connecting the consumer client
    Connecting,
    /// Subscribed, pulling loop not yet started
    Subscribed,
    /// Pulling and dispatching messages
    Running,
    /// Pulling stopped; waiting for in-flight handlers
    Draining,
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Running => "running",
            Self::Draining => "draining",
        };
        f.write_str(name)
    }
}

/// Health of one consumer group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupHealth {
    /// Consumer group id
    pub group_id: String,
    /// Subscribed topics
    pub topics: Vec<String>,
    /// Current state
    pub state: GroupState,
}

/// Health report for an external health endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    /// The bus is initialized
    pub initialized: bool,
    /// Producer and admin clients are connected
    pub connected: bool,
    /// Consumer groups tracked by the bus
    pub consumer_groups: Vec<GroupHealth>,
}

impl HealthStatus {
    /// Initialized, connected and every consumer group running.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.initialized
            && self.connected
            && self
                .consumer_groups
                .iter()
                .all(|group| group.state == GroupState::Running)
    }
}

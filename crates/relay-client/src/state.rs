//! Caller-visible relay state.

use crate::RelayMessage;
use serde::Serialize;

/// Session stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    WaitingForMoreMembers,
    SessionInProgress,
    ConnectionClosed,
}

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    /// First connection attempt of a session that has not started.
    Connecting,
    Connected,
    Reconnecting,
    /// Transport killed by `pause()`; resumed with `reconnect()`.
    Paused,
    Disconnected,
}

/// Why the instance is disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisconnectReason {
    InitialConnectionFailed,
    SessionEnded,
    ConnectionOverwritten,
    ConnectionDied,
    DisconnectRequested,
}

impl DisconnectReason {
    /// Whether `reconnect()` may restart the connection loop.
    pub fn is_reconnectable(self) -> bool {
        matches!(self, Self::ConnectionDied | Self::InitialConnectionFailed)
    }
}

/// Snapshot of one relay instance.
///
/// While `ready` is false the session fields may be stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayState {
    pub stage: Stage,
    pub connection_status: ConnectionStatus,
    /// Only meaningful while connected.
    pub connection_is_stable: bool,
    pub ready: bool,
    /// Set while `Disconnected`.
    pub disconnect_reason: Option<DisconnectReason>,
    /// This client's slot index, once assigned.
    pub member_num: Option<u32>,
    pub member_presence: Vec<bool>,
    pub is_host: bool,
    /// Share code of a private session this client is hosting.
    pub password: Option<String>,
    pub pinned_message: Option<RelayMessage>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self {
            stage: Stage::WaitingForMoreMembers,
            connection_status: ConnectionStatus::Connecting,
            connection_is_stable: true,
            ready: false,
            disconnect_reason: None,
            member_num: None,
            member_presence: Vec::new(),
            is_host: false,
            password: None,
            pinned_message: None,
        }
    }
}

impl RelayState {
    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected
    }

    /// Terminal for this instance: disconnected for a reason `reconnect()`
    /// does not accept.
    pub fn is_closed(&self) -> bool {
        self.connection_status == ConnectionStatus::Disconnected
            && !self
                .disconnect_reason
                .map(DisconnectReason::is_reconnectable)
                .unwrap_or(false)
    }

    /// Whether `reconnect()` would restart the connection loop.
    pub fn can_reconnect(&self) -> bool {
        match self.connection_status {
            ConnectionStatus::Paused => true,
            ConnectionStatus::Disconnected => self
                .disconnect_reason
                .map(DisconnectReason::is_reconnectable)
                .unwrap_or(false),
            _ => false,
        }
    }
}

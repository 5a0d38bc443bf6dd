//! Connection state types.

use std::fmt;

use chrono::{DateTime, Utc};

/// Lifecycle status of the gateway connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// No connection and none pending.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake complete.
    Connected,
    /// Manual disconnect in progress.
    Disconnecting,
    /// Last attempt failed or reconnection gave up.
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of the connection, replaced on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// Current status.
    pub status: ConnectionStatus,
    /// Gateway-assigned id; only set while connected.
    pub connection_id: Option<String>,
    /// Caller-supplied user id.
    pub user_id: Option<String>,
    /// Caller-supplied session id.
    pub session_id: Option<String>,
    /// Reconnect attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Last transition into connected, refreshed by pongs.
    pub last_connected: Option<DateTime<Utc>>,
}

impl ConnectionState {
    /// Returns true if the status is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

//! Client error types.
//!
//! Provides the error type for socket and connection manager operations.

use std::time::Duration;

use crate::config::ConfigError;
use crate::resilience::{Classify, FailureKind};

/// Socket client errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The gateway did not complete the handshake in time.
    #[error("connection timed out after {}ms", .0.as_millis())]
    ConnectionTimeout(Duration),

    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The gateway rejected the handshake with an HTTP status.
    #[error("handshake rejected with status {0}")]
    HandshakeRejected(u16),

    /// The transport reported an error on an open connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// Inbound frame could not be decoded.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A message handler failed.
    #[error("handler for '{action}' failed: {message}")]
    Handler {
        /// Action the handler was registered for.
        action: String,
        /// Failure description.
        message: String,
    },

    /// Failed to serialize an outbound message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The pending connect was cancelled by a manual disconnect.
    #[error("connect aborted by disconnect")]
    Aborted,

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Automatic reconnection gave up.
    #[error("reconnect failed after {0} attempts")]
    ReconnectExhausted(u32),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        match err {
            tokio_tungstenite::tungstenite::Error::Http(response) => {
                Self::HandshakeRejected(response.status().as_u16())
            }
            other => Self::Connection(other.to_string()),
        }
    }
}

impl Classify for ClientError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::ConnectionTimeout(_) => FailureKind::Timeout,
            Self::Connection(_) | Self::Transport(_) => FailureKind::Network,
            Self::HandshakeRejected(status) => FailureKind::Status(*status),
            _ => FailureKind::Other,
        }
    }
}

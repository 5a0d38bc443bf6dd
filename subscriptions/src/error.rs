//! Subscription error types.

use std::time::Duration;

use rtlink_client::{CircuitError, Classify, ConfigError, FailureKind, RetryError};

/// Subscription channel errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Could not reach the subscription endpoint, or the socket dropped.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The endpoint rejected the handshake with an HTTP status.
    #[error("handshake rejected with status {0}")]
    HandshakeRejected(u16),

    /// The endpoint did not acknowledge the connection in time.
    #[error("no acknowledgement after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The endpoint sent an unexpected frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The endpoint reported an error for the subscription.
    #[error("subscription error: {0}")]
    Server(String),

    /// The channel's circuit breaker is open.
    #[error("circuit '{0}' is open")]
    CircuitOpen(String),

    /// Opening the subscription failed on every attempt.
    #[error("gave up after {attempts} attempt(s): {last}")]
    RetryExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the last attempt.
        last: Box<SubscriptionError>,
    },

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<tokio_tungstenite::tungstenite::Error> for SubscriptionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        match err {
            tokio_tungstenite::tungstenite::Error::Http(response) => {
                Self::HandshakeRejected(response.status().as_u16())
            }
            other => Self::Connection(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SubscriptionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<CircuitError<RetryError<SubscriptionError>>> for SubscriptionError {
    fn from(err: CircuitError<RetryError<SubscriptionError>>) -> Self {
        match err {
            CircuitError::Open { name } => Self::CircuitOpen(name),
            CircuitError::Inner(RetryError {
                attempts,
                last_error,
            }) => Self::RetryExhausted {
                attempts,
                last: Box::new(last_error),
            },
        }
    }
}

impl Classify for SubscriptionError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Connection(_) => FailureKind::Network,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::HandshakeRejected(status) => FailureKind::Status(*status),
            Self::RetryExhausted { last, .. } => last.failure_kind(),
            _ => FailureKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = SubscriptionError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "no acknowledgement after 5000ms");

        let err = SubscriptionError::RetryExhausted {
            attempts: 3,
            last: Box::new(SubscriptionError::Connection("refused".to_string())),
        };
        assert_eq!(err.to_string(), "gave up after 3 attempt(s): connection failed: refused");
    }

    #[test]
    fn test_from_circuit_error() {
        let open: CircuitError<RetryError<SubscriptionError>> = CircuitError::Open {
            name: "subscription:chat".to_string(),
        };
        assert_eq!(
            SubscriptionError::from(open),
            SubscriptionError::CircuitOpen("subscription:chat".to_string())
        );

        let inner = CircuitError::Inner(RetryError {
            attempts: 2,
            last_error: SubscriptionError::HandshakeRejected(401),
        });
        let err = SubscriptionError::from(inner);
        assert_eq!(err.failure_kind(), FailureKind::Status(401));
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            SubscriptionError::Connection("reset".to_string()).failure_kind(),
            FailureKind::Network
        );
        assert_eq!(
            SubscriptionError::Server("bad query".to_string()).failure_kind(),
            FailureKind::Other
        );
    }
}

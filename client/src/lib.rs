//! rtlink client - resilient real-time connection to a backend gateway.
//!
//! This crate owns the bidirectional socket half of the real-time layer. It
//! keeps one long-lived connection to the gateway alive across flaky
//! networks and hands inbound messages to any number of registered
//! consumers.
//!
//! # Components
//!
//! - [`resilience`]: Exponential-backoff retry executor and circuit breaker
//! - [`observer`]: Ordered listener lists with cancellation handles
//! - [`socket`]: [`SocketClient`], its state machine, heartbeat and offline queue
//! - [`manager`]: [`ConnectionManager`], identity enrichment and per-action dispatch
//! - [`messages`]: Wire envelope types and well-known actions
//! - [`config`]: Client configuration and environment loading
//! - [`metrics`]: Client metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use rtlink_client::{ClientConfig, ConnectionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ConnectionManager::with_url("wss://gateway.example/ws")?;
//!     manager.set_user_id(Some("user-42".to_string()));
//!
//!     let _pong = manager.on_message("pong", |msg| {
//!         println!("pong: {:?}", msg.data);
//!         Ok(())
//!     });
//!
//!     manager.connect().await?;
//!     manager.send_text_message("hello", None);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod messages;
pub mod metrics;
pub mod observer;
pub mod resilience;
pub mod socket;

pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use manager::{ConnectionManager, DispatchOutcome, HandlerRegistry, HandlerResult};
pub use messages::{actions, InboundMessage, OutboundMessage};
pub use metrics::ClientMetrics;
pub use observer::{ListenerHandle, Listeners};
pub use resilience::{
    with_retry, CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState, Classify,
    FailureKind, RetryConfig, RetryError, RetryExecutor, RetryOptions,
};
pub use socket::{
    CloseInfo, ConnectionState, ConnectionStatus, Connector, MessageQueue, SocketClient,
    TransportCommand, TransportEvent, TransportLink, TungsteniteConnector, WeakSocketClient,
};

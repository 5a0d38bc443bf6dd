//! rtlink subscriptions - self-healing server-push channels.
//!
//! Each signed-in user gets one [`SubscriptionRegistry`] holding a channel
//! per topic. Channels open through the retry executor and circuit breaker
//! from `rtlink-client`, reopen themselves after errors, and fail
//! independently of one another.
//!
//! # Components
//!
//! - [`registry`]: [`SubscriptionRegistry`], standing and voice topics, aggregate status
//! - [`channel`]: [`SubscriptionChannel`] and its retry loop
//! - [`transport`]: [`SubscriptionTransport`] and the `graphql-transport-ws` implementation
//! - [`topics`]: Well-known topics and their subscription documents
//! - [`config`]: Endpoint and retry configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use rtlink_subscriptions::{SubscriptionRegistry, Topic};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = SubscriptionRegistry::with_url("wss://events.example/graphql")?;
//!
//!     let _chat = registry.on_event(Topic::Chat, |event| {
//!         println!("chat: {:?}", event.payload);
//!     });
//!
//!     registry.start("user-42");
//!     tokio::signal::ctrl_c().await?;
//!     registry.shutdown();
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod registry;
pub mod topics;
pub mod transport;

pub use channel::{ChannelState, ChannelStatus, SubscribeOptions, SubscriptionChannel};
pub use config::SubscriptionConfig;
pub use error::SubscriptionError;
pub use registry::SubscriptionRegistry;
pub use topics::Topic;
pub use transport::{
    ChannelEvent, EventStream, GraphqlWsTransport, SubscriptionRequest, SubscriptionTransport,
};

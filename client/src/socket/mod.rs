//! Gateway socket: connection state machine, heartbeat and offline queue.
//!
//! # Example
//!
//! ```rust,ignore
//! use rtlink_client::socket::SocketClient;
//!
//! let client = SocketClient::with_url("wss://gateway.example/ws")?;
//! let _handle = client.on_message(|msg| println!("{}", msg.action));
//! client.connect().await?;
//! ```

pub mod client;
pub mod queue;
pub mod state;
pub mod transport;

pub use client::{SocketClient, WeakSocketClient};
pub use queue::MessageQueue;
pub use state::{ConnectionState, ConnectionStatus};
pub use transport::{
    CloseInfo, Connector, TransportCommand, TransportEvent, TransportLink, TungsteniteConnector,
};

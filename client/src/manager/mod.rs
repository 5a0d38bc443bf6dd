//! Session-level connection management.
//!
//! - [`ConnectionManager`]: identity enrichment, per-action dispatch and domain send helpers
//! - [`HandlerRegistry`]: ordered handler lists keyed by action

pub mod connection;
pub mod handlers;

pub use connection::ConnectionManager;
pub use handlers::{DispatchOutcome, HandlerRegistry, HandlerResult};

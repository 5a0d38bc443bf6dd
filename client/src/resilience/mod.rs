//! Resilience primitives.
//!
//! - [`retry`]: exponential backoff with jitter around a fallible async operation
//! - [`circuit_breaker`]: closed/open/half-open guard for repeatedly failing operations

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState};
pub use retry::{
    backoff_delay, retry_on_transient, retry_unless_unauthorized, with_retry, Classify,
    FailureKind, RetryConfig, RetryError, RetryExecutor, RetryOptions,
};

//! Circuit breaker for repeatedly failing operations.
//!
//! # States
//!
//! - **Closed**: calls pass through; consecutive failures are counted
//! - **Open**: calls fail fast with [`CircuitError::Open`]
//! - **`HalfOpen`**: the recovery window has elapsed and calls are let
//!   through as probes; one success closes the circuit, one failure
//!   re-opens it
//!
//! Transitions depend only on the failure count and the time elapsed since
//! the last failure.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::retry::{Classify, FailureKind};
use crate::config::{env_duration_ms, env_or, ConfigError};

/// Default failures before the circuit opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default recovery window in milliseconds.
pub const DEFAULT_RECOVERY_TIMEOUT_MS: u64 = 60_000;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failing fast.
    Open,
    /// Probing recovery.
    HalfOpen,
}

impl CircuitState {
    /// Returns true if the circuit is closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns true if the circuit is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns true if the circuit is half-open.
    #[must_use]
    pub const fn is_half_open(&self) -> bool {
        matches!(self, Self::HalfOpen)
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time after the last failure before a probe is allowed.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: Duration::from_millis(DEFAULT_RECOVERY_TIMEOUT_MS),
        }
    }
}

impl CircuitBreakerConfig {
    /// Loads the configuration from `RTLINK_BREAKER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            failure_threshold: env_or(
                "RTLINK_BREAKER_FAILURE_THRESHOLD",
                defaults.failure_threshold,
            )?,
            recovery_timeout: env_duration_ms(
                "RTLINK_BREAKER_RECOVERY_TIMEOUT_MS",
                defaults.recovery_timeout,
            )?,
        })
    }

    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the recovery window.
    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the threshold is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "failure_threshold must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitError<E> {
    /// The circuit is open; the operation was not invoked.
    Open {
        /// Breaker name.
        name: String,
    },
    /// The operation ran and failed.
    Inner(E),
}

impl<E> CircuitError<E> {
    /// Returns true if the call was refused by an open circuit.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Returns the operation error, if the operation ran.
    #[must_use]
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Open { .. } => None,
            Self::Inner(err) => Some(err),
        }
    }
}

impl<E: fmt::Display> fmt::Display for CircuitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { name } => write!(f, "circuit '{}' is open", name),
            Self::Inner(err) => write!(f, "{}", err),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for CircuitError<E> {}

impl<E: Classify> Classify for CircuitError<E> {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Open { .. } => FailureKind::Other,
            Self::Inner(err) => err.failure_kind(),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
}

/// Circuit breaker guarding one category of operations.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
            }),
        }
    }

    /// Creates a circuit breaker with default configuration.
    #[must_use]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Returns the breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state, moving OPEN to HALF_OPEN if the window elapsed.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.refresh(&mut state);
        state.state
    }

    /// Returns the consecutive failure count.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.state.lock().failures
    }

    /// Returns true if a call would be let through right now.
    #[must_use]
    pub fn allow_request(&self) -> bool {
        !self.state().is_open()
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "circuit closed; operation recovered");
                state.state = CircuitState::Closed;
                state.failures = 0;
                state.last_failure = None;
            }
            CircuitState::Closed => {
                state.failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failures = state.failures.saturating_add(1);
        state.last_failure = Some(Instant::now());

        match state.state {
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "probe failed; circuit re-opened");
                state.state = CircuitState::Open;
            }
            CircuitState::Closed if state.failures >= self.config.failure_threshold => {
                warn!(
                    breaker = %self.name,
                    failures = state.failures,
                    threshold = self.config.failure_threshold,
                    "circuit opened"
                );
                state.state = CircuitState::Open;
            }
            _ => {
                debug!(
                    breaker = %self.name,
                    failures = state.failures,
                    "failure recorded"
                );
            }
        }
    }

    /// Resets to CLOSED with no failures.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.state = CircuitState::Closed;
        state.failures = 0;
        state.last_failure = None;
    }

    /// Runs `operation` unless the circuit is open.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitError::Open`] without invoking the operation when the
    /// circuit is open, or [`CircuitError::Inner`] when the operation fails.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow_request() {
            debug!(breaker = %self.name, "circuit open; refusing call");
            return Err(CircuitError::Open {
                name: self.name.clone(),
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitError::Inner(err))
            }
        }
    }

    fn refresh(&self, state: &mut BreakerState) {
        if state.state != CircuitState::Open {
            return;
        }

        let elapsed = state
            .last_failure
            .map_or(Duration::MAX, |at| at.elapsed());

        if elapsed > self.config.recovery_timeout {
            info!(breaker = %self.name, "recovery window elapsed; circuit half-open");
            state.state = CircuitState::HalfOpen;
        }
    }
}

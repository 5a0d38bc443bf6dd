//! Client configuration.
//!
//! Provides configuration options for the gateway socket client and the
//! environment helpers shared by the other configuration types.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default gateway URL.
pub const DEFAULT_GATEWAY_URL: &str = "ws://localhost:8080/ws";

/// Default delay before a reconnect attempt, in milliseconds.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3_000;

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default heartbeat interval in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Default handshake timeout in milliseconds.
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 10_000;

/// Default capacity of the offline message queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Gateway socket configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Gateway WebSocket URL.
    pub url: String,

    /// Delay before each reconnect attempt.
    pub reconnect_interval: Duration,

    /// Reconnect attempts allowed after an unexpected close.
    pub max_reconnect_attempts: u32,

    /// Interval between heartbeat pings.
    pub heartbeat_interval: Duration,

    /// Time allowed for the handshake to complete.
    pub connection_timeout: Duration,

    /// Capacity of the offline message queue.
    pub queue_capacity: usize,

    /// Optional token appended to the connection URL.
    pub auth_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            connection_timeout: Duration::from_millis(DEFAULT_CONNECTION_TIMEOUT_MS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            auth_token: None,
        }
    }
}

impl ClientConfig {
    /// Creates a new configuration with the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Loads the configuration from `RTLINK_*` environment variables.
    ///
    /// Unset variables fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            url: env::var("RTLINK_GATEWAY_URL").unwrap_or(defaults.url),
            reconnect_interval: env_duration_ms(
                "RTLINK_RECONNECT_INTERVAL_MS",
                defaults.reconnect_interval,
            )?,
            max_reconnect_attempts: env_or(
                "RTLINK_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            )?,
            heartbeat_interval: env_duration_ms(
                "RTLINK_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval,
            )?,
            connection_timeout: env_duration_ms(
                "RTLINK_CONNECTION_TIMEOUT_MS",
                defaults.connection_timeout,
            )?,
            queue_capacity: env_or("RTLINK_QUEUE_CAPACITY", defaults.queue_capacity)?,
            auth_token: env::var("RTLINK_AUTH_TOKEN").ok(),
        })
    }

    /// Sets the reconnect interval.
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Sets the maximum reconnect attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Sets the offline queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the auth token.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Returns the connection URL with the auth token if set.
    #[must_use]
    pub fn connection_url(&self) -> String {
        match &self.auth_token {
            Some(token) => {
                if self.url.contains('?') {
                    format!("{}&token={}", self.url, token)
                } else {
                    format!("{}?token={}", self.url, token)
                }
            }
            None => self.url.clone(),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Invalid("url cannot be empty".to_string()));
        }

        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(ConfigError::Invalid(
                "url must start with ws:// or wss://".to_string(),
            ));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat_interval must be > 0".to_string(),
            ));
        }

        if self.connection_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "connection_timeout must be > 0".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Reads and parses an environment variable, falling back to `default` when unset.
///
/// # Errors
///
/// Returns an error if the variable is set but cannot be parsed.
pub fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

/// Reads a millisecond duration from an environment variable.
///
/// # Errors
///
/// Returns an error if the variable is set but is not a whole number.
pub fn env_duration_ms(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    env_or(key, default_ms).map(Duration::from_millis)
}

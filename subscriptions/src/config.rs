//! Subscription configuration.

use std::time::Duration;

use rtlink_client::config::{env_duration_ms, env_or};
use rtlink_client::{CircuitBreakerConfig, ConfigError, RetryConfig};

/// Default subscription endpoint.
pub const DEFAULT_SUBSCRIPTION_URL: &str = "ws://localhost:4000/graphql";

/// Default channel-level retries after an error.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between channel-level retries, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Default cap on the channel-level retry delay, in milliseconds.
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Default time allowed for the protocol handshake, in milliseconds.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;

/// Subscription endpoint and retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionConfig {
    /// Subscription WebSocket URL.
    pub url: String,

    /// Optional token sent in `connection_init`.
    pub auth_token: Option<String>,

    /// Time allowed for connect plus `connection_ack`.
    pub ack_timeout: Duration,

    /// Channel-level retries after an error.
    pub max_retries: u32,

    /// Base delay between channel-level retries.
    pub retry_delay: Duration,

    /// Cap on the channel-level retry delay.
    pub max_retry_delay: Duration,

    /// Retry policy for each open attempt.
    pub retry: RetryConfig,

    /// Per-channel circuit breaker.
    pub breaker: CircuitBreakerConfig,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SUBSCRIPTION_URL.to_string(),
            auth_token: None,
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_retry_delay: Duration::from_millis(DEFAULT_MAX_RETRY_DELAY_MS),
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl SubscriptionConfig {
    /// Creates a configuration for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Loads the configuration from `RTLINK_SUBSCRIPTION_*`, `RTLINK_RETRY_*`
    /// and `RTLINK_BREAKER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            url: env_or("RTLINK_SUBSCRIPTION_URL", defaults.url)?,
            auth_token: std::env::var("RTLINK_SUBSCRIPTION_AUTH_TOKEN").ok(),
            ack_timeout: env_duration_ms("RTLINK_SUBSCRIPTION_ACK_TIMEOUT_MS", defaults.ack_timeout)?,
            max_retries: env_or("RTLINK_SUBSCRIPTION_MAX_RETRIES", defaults.max_retries)?,
            retry_delay: env_duration_ms("RTLINK_SUBSCRIPTION_RETRY_DELAY_MS", defaults.retry_delay)?,
            max_retry_delay: defaults.max_retry_delay,
            retry: RetryConfig::from_env()?,
            breaker: CircuitBreakerConfig::from_env()?,
        })
    }

    /// Sets the auth token.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets the channel-level retry ceiling.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the channel-level retry base delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the per-attempt retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-channel breaker configuration.
    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(ConfigError::Invalid(
                "subscription url must start with ws:// or wss://".to_string(),
            ));
        }

        if self.ack_timeout.is_zero() {
            return Err(ConfigError::Invalid("ack_timeout must be > 0".to_string()));
        }

        self.retry.validate()?;
        self.breaker.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SubscriptionConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = SubscriptionConfig::new("wss://events.example/graphql")
            .with_auth_token("secret")
            .with_max_retries(5);
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_config_validate_scheme() {
        let config = SubscriptionConfig::new("https://events.example/graphql");
        assert!(config.validate().is_err());
    }
}

//! Retry with exponential backoff and jitter.
//!
//! [`with_retry`] runs an async operation until it succeeds, the attempt
//! ceiling is reached, or the retry condition rejects the error. The wait
//! before attempt `n + 1` is
//! `min(base_delay * backoff_factor^(n - 1), max_delay) + jitter`, where the
//! jitter is drawn uniformly from `0..=max_jitter`.
//!
//! # Example
//!
//! ```rust,ignore
//! use rtlink_client::resilience::{with_retry, RetryOptions};
//!
//! let options = RetryOptions::<ClientError>::default()
//!     .with_max_attempts(3)
//!     .retry_on_transient();
//! let value = with_retry(|| fetch_token(), &options).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::{env_duration_ms, env_or, ConfigError};

/// Default attempt ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry, in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Default delay cap, in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Default backoff multiplier.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Default jitter ceiling, in milliseconds.
pub const DEFAULT_MAX_JITTER_MS: u64 = 1_000;

/// Coarse failure classification used by the built-in retry predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network-level failure (refused, reset, closed).
    Network,
    /// The operation timed out.
    Timeout,
    /// The remote answered with a status code.
    Status(u16),
    /// Anything else.
    Other,
}

/// Maps an error onto a [`FailureKind`].
pub trait Classify {
    /// Returns the failure class of this error.
    fn failure_kind(&self) -> FailureKind;
}

/// Retries network, timeout and 5xx failures (plus 408/429); never 401/403.
pub fn retry_on_transient<E: Classify + ?Sized>(err: &E) -> bool {
    match err.failure_kind() {
        FailureKind::Network | FailureKind::Timeout => true,
        FailureKind::Status(401 | 403) => false,
        FailureKind::Status(status) => status >= 500 || status == 408 || status == 429,
        FailureKind::Other => false,
    }
}

/// Retries everything except 401/403 rejections.
pub fn retry_unless_unauthorized<E: Classify + ?Sized>(err: &E) -> bool {
    !matches!(err.failure_kind(), FailureKind::Status(401 | 403))
}

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound on the exponential part of the delay.
    pub max_delay: Duration,

    /// Multiplier applied per attempt.
    pub backoff_factor: f64,

    /// Upper bound on the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_jitter: Duration::from_millis(DEFAULT_MAX_JITTER_MS),
        }
    }
}

impl RetryConfig {
    /// Loads the configuration from `RTLINK_RETRY_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_attempts: env_or("RTLINK_RETRY_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_delay: env_duration_ms("RTLINK_RETRY_BASE_DELAY_MS", defaults.base_delay)?,
            max_delay: env_duration_ms("RTLINK_RETRY_MAX_DELAY_MS", defaults.max_delay)?,
            backoff_factor: env_or("RTLINK_RETRY_BACKOFF_FACTOR", defaults.backoff_factor)?,
            max_jitter: env_duration_ms("RTLINK_RETRY_MAX_JITTER_MS", defaults.max_jitter)?,
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be >= 1".to_string()));
        }

        if self.backoff_factor < 1.0 || !self.backoff_factor.is_finite() {
            return Err(ConfigError::Invalid(
                "backoff_factor must be >= 1.0".to_string(),
            ));
        }

        if self.base_delay > self.max_delay {
            return Err(ConfigError::Invalid(
                "base_delay must be <= max_delay".to_string(),
            ));
        }

        Ok(())
    }
}

/// Computes `min(base * factor^(attempt - 1), max)` for a 1-indexed attempt.
#[must_use]
pub fn backoff_delay(base: Duration, factor: f64, attempt: u32, max: Duration) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let millis = base.as_millis() as f64 * factor.powi(exponent);
    let cap = max.as_millis() as f64;

    if !millis.is_finite() || millis >= cap {
        return max;
    }

    Duration::from_millis(millis.max(0.0) as u64)
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

type RetryCondition<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type RetryHook<E> = Arc<dyn Fn(u32, &E) + Send + Sync>;

/// Backoff parameters plus the retry predicate and observer hook.
pub struct RetryOptions<E> {
    /// Backoff parameters.
    pub config: RetryConfig,
    retry_condition: Option<RetryCondition<E>>,
    on_retry: Option<RetryHook<E>>,
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            retry_condition: self.retry_condition.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("config", &self.config)
            .field("retry_condition", &self.retry_condition.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl<E> RetryOptions<E> {
    /// Creates options that retry every error.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retry_condition: None,
            on_retry: None,
        }
    }

    /// Sets the attempt ceiling.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.config.backoff_factor = factor;
        self
    }

    /// Sets the jitter ceiling. Zero disables jitter.
    #[must_use]
    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.config.max_jitter = jitter;
        self
    }

    /// Sets the predicate deciding whether an error is worth another attempt.
    #[must_use]
    pub fn with_retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Some(Arc::new(condition));
        self
    }

    /// Sets the hook called with `(attempt, error)` before each wait.
    #[must_use]
    pub fn with_on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &E) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Returns true if `err` may be retried.
    #[must_use]
    pub fn should_retry(&self, err: &E) -> bool {
        self.retry_condition
            .as_ref()
            .map_or(true, |condition| condition(err))
    }

    /// Returns the wait after a failed 1-indexed `attempt`, jitter included.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(
            self.config.base_delay,
            self.config.backoff_factor,
            attempt,
            self.config.max_delay,
        ) + random_jitter(self.config.max_jitter)
    }
}

impl<E: Classify + 'static> RetryOptions<E> {
    /// Retries only network, timeout and 5xx-class failures.
    #[must_use]
    pub fn retry_on_transient(self) -> Self {
        self.with_retry_condition(|err: &E| retry_on_transient(err))
    }

    /// Retries everything except 401/403 rejections.
    #[must_use]
    pub fn retry_unless_unauthorized(self) -> Self {
        self.with_retry_condition(|err: &E| retry_unless_unauthorized(err))
    }
}

/// All attempts failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError<E> {
    /// Number of attempts made.
    pub attempts: u32,
    /// Error returned by the last attempt.
    pub last_error: E,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "retry exhausted after {} attempt(s): {}",
            self.attempts, self.last_error
        )
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

impl<E: Classify> Classify for RetryError<E> {
    fn failure_kind(&self) -> FailureKind {
        self.last_error.failure_kind()
    }
}

/// Runs `operation` with retries according to `options`.
///
/// # Errors
///
/// Returns [`RetryError`] with the attempt count and the last error once the
/// attempt ceiling is reached or the retry condition rejects an error.
pub async fn with_retry<T, E, F, Fut>(
    mut operation: F,
    options: &RetryOptions<E>,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = options.config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt >= max_attempts || !options.should_retry(&err) {
                    warn!(attempt, error = %err, "giving up on operation");
                    return Err(RetryError {
                        attempts: attempt,
                        last_error: err,
                    });
                }

                let delay = options.delay_for(attempt);
                if let Some(hook) = &options.on_retry {
                    hook(attempt, &err);
                }
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Reusable retry wrapper bound to one set of options.
#[derive(Debug, Clone)]
pub struct RetryExecutor<E> {
    options: RetryOptions<E>,
}

impl<E> Default for RetryExecutor<E> {
    fn default() -> Self {
        Self::new(RetryOptions::default())
    }
}

impl<E> RetryExecutor<E> {
    /// Creates an executor.
    #[must_use]
    pub fn new(options: RetryOptions<E>) -> Self {
        Self { options }
    }

    /// Returns the options.
    #[must_use]
    pub const fn options(&self) -> &RetryOptions<E> {
        &self.options
    }
}

impl<E: fmt::Display> RetryExecutor<E> {

    /// Runs `operation` with retries.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] once retries are exhausted.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        with_retry(operation, &self.options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(FailureKind);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }

    impl Classify for TestError {
        fn failure_kind(&self) -> FailureKind {
            self.0
        }
    }

    fn options() -> RetryOptions<TestError> {
        RetryOptions::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_jitter(Duration::ZERO)
    }

    fn fail_times(calls: &AtomicU32, failures: u32) -> Result<&'static str, TestError> {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= failures {
            Err(TestError(FailureKind::Network))
        } else {
            Ok("done")
        }
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let base = Duration::from_millis(1_000);
        let max = Duration::from_millis(5_000);
        assert_eq!(backoff_delay(base, 2.0, 1, max), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(base, 2.0, 2, max), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(base, 2.0, 3, max), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(base, 2.0, 4, max), max);
        assert_eq!(backoff_delay(base, 2.0, 400, max), max);
    }

    #[test]
    fn test_delay_jitter_bounded() {
        let options = RetryOptions::<TestError>::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_jitter(Duration::from_millis(1_000));
        for _ in 0..50 {
            let delay = options.delay_for(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(1_100));
        }
    }

    #[test]
    fn test_builtin_predicates() {
        assert!(retry_on_transient(&TestError(FailureKind::Network)));
        assert!(retry_on_transient(&TestError(FailureKind::Timeout)));
        assert!(retry_on_transient(&TestError(FailureKind::Status(503))));
        assert!(!retry_on_transient(&TestError(FailureKind::Status(401))));
        assert!(!retry_on_transient(&TestError(FailureKind::Status(403))));
        assert!(!retry_on_transient(&TestError(FailureKind::Status(404))));
        assert!(!retry_on_transient(&TestError(FailureKind::Other)));

        assert!(retry_unless_unauthorized(&TestError(FailureKind::Other)));
        assert!(!retry_unless_unauthorized(&TestError(FailureKind::Status(403))));
    }

    #[test]
    fn test_config_validate() {
        assert!(RetryConfig::default().validate().is_ok());

        let config = RetryConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RetryConfig {
            backoff_factor: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(
            || async move { fail_times(counter, 2) },
            &options().with_max_attempts(3),
        )
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(
            || async move { fail_times(counter, 2) },
            &options().with_max_attempts(2),
        )
        .await;

        let err = result.expect_err("should exhaust");
        assert_eq!(err.attempts, 2);
        assert_eq!(err.last_error, TestError(FailureKind::Network));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_condition_stops_early() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry(
            || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError(FailureKind::Status(401)))
            },
            &options().with_max_attempts(5).retry_on_transient(),
        )
        .await;

        let err = result.expect_err("should stop");
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_retry_called_before_each_wait() {
        let calls = AtomicU32::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = Arc::clone(&seen);
        let options = options()
            .with_max_attempts(4)
            .with_on_retry(move |attempt, _err| hook_seen.lock().push(attempt));

        let counter = &calls;
        let result = with_retry(|| async move { fail_times(counter, 3) }, &options).await;

        assert_eq!(result, Ok("done"));
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_follow_backoff() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let start = tokio::time::Instant::now();
        let result = with_retry(
            || async move { fail_times(counter, 2) },
            &options().with_max_attempts(3),
        )
        .await;

        assert!(result.is_ok());
        // 100ms after the first failure, 200ms after the second
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(310));
    }

    #[tokio::test(start_paused = true)]
    async fn test_executor_delegates() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let executor = RetryExecutor::new(options().with_max_attempts(2));
        let result = executor
            .execute(|| async move { fail_times(counter, 1) })
            .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(executor.options().config.max_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_executor_uses_default_config() {
        let executor = RetryExecutor::<TestError>::default();
        assert_eq!(executor.options().config, RetryConfig::default());

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = executor
            .execute(|| async move { fail_times(counter, 1) })
            .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_error_display() {
        let err = RetryError {
            attempts: 3,
            last_error: TestError(FailureKind::Timeout),
        };
        assert_eq!(err.to_string(), "retry exhausted after 3 attempt(s): Timeout");
        assert_eq!(err.failure_kind(), FailureKind::Timeout);
    }
}

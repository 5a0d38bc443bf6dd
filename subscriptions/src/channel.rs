//! Self-healing subscription channel.
//!
//! A [`SubscriptionChannel`] owns one background task that opens its
//! subscription through a retry executor behind a per-channel circuit
//! breaker, delivers events, and reopens the subscription after an error
//! with exponential backoff until its retry ceiling is reached. Channels
//! never share retry state, so one failing channel leaves its siblings
//! untouched.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use rtlink_client::resilience::backoff_delay;
use rtlink_client::{
    with_retry, CircuitBreaker, ListenerHandle, Listeners, RetryOptions,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SubscriptionConfig;
use crate::error::SubscriptionError;
use crate::transport::{ChannelEvent, SubscriptionRequest, SubscriptionTransport};

/// Channel connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Opening the subscription.
    #[default]
    Connecting,
    /// Receiving events.
    Connected,
    /// Closed by the caller or completed by the server.
    Disconnected,
    /// Last attempt failed.
    Error,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Current state.
    pub state: ChannelState,
    /// Retries since the last delivered event.
    pub retry_count: u32,
    /// Most recent error, cleared on connect.
    pub last_error: Option<SubscriptionError>,
}

type EventFn = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&SubscriptionError) + Send + Sync>;
type NotifyFn = Arc<dyn Fn() + Send + Sync>;

/// Per-subscription callbacks and retry policy.
#[derive(Clone)]
pub struct SubscribeOptions {
    /// Reopen after errors.
    pub auto_reconnect: bool,
    /// Retries after an error before giving up.
    pub max_retries: u32,
    /// Base delay between retries, doubled per retry.
    pub retry_delay: Duration,
    on_event: Option<EventFn>,
    on_error: Option<ErrorFn>,
    on_connected: Option<NotifyFn>,
    on_disconnected: Option<NotifyFn>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self::from_config(&SubscriptionConfig::default())
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("auto_reconnect", &self.auto_reconnect)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl SubscribeOptions {
    /// Options using the configured retry ceiling and delay.
    #[must_use]
    pub fn from_config(config: &SubscriptionConfig) -> Self {
        Self {
            auto_reconnect: true,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            on_event: None,
            on_error: None,
            on_connected: None,
            on_disconnected: None,
        }
    }

    /// Sets the event callback.
    #[must_use]
    pub fn on_event(mut self, f: impl Fn(&ChannelEvent) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(f));
        self
    }

    /// Sets the error callback.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&SubscriptionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Sets the connected callback.
    #[must_use]
    pub fn on_connected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Arc::new(f));
        self
    }

    /// Sets the disconnected callback.
    #[must_use]
    pub fn on_disconnected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnected = Some(Arc::new(f));
        self
    }

    /// Enables or disables reopening after errors.
    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Sets the retry ceiling.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the retry base delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[derive(Default)]
struct ChannelEvents {
    event: Listeners<ChannelEvent>,
    error: Listeners<SubscriptionError>,
    connected: Listeners<()>,
    disconnected: Listeners<()>,
}

struct ChannelCore {
    request: SubscriptionRequest,
    transport: Arc<dyn SubscriptionTransport>,
    breaker: CircuitBreaker,
    retry: RetryOptions<SubscriptionError>,
    auto_reconnect: bool,
    max_retries: u32,
    retry_delay: Duration,
    max_retry_delay: Duration,
    status: RwLock<ChannelStatus>,
    events: ChannelEvents,
}

/// One named server-push subscription.
pub struct SubscriptionChannel {
    id: Uuid,
    core: Arc<ChannelCore>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for SubscriptionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionChannel")
            .field("id", &self.id)
            .field("topic", &self.core.request.topic)
            .field("status", &*self.core.status.read())
            .finish()
    }
}

impl SubscriptionChannel {
    /// Creates the channel and starts opening it in the background.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn open(
        request: SubscriptionRequest,
        options: SubscribeOptions,
        config: &SubscriptionConfig,
        transport: Arc<dyn SubscriptionTransport>,
    ) -> Self {
        // Option callbacks stay registered for the channel's lifetime.
        let events = ChannelEvents::default();
        if let Some(f) = options.on_event {
            let _ = events.event.add(move |event| f(event));
        }
        if let Some(f) = options.on_error {
            let _ = events.error.add(move |err| f(err));
        }
        if let Some(f) = options.on_connected {
            let _ = events.connected.add(move |_| f());
        }
        if let Some(f) = options.on_disconnected {
            let _ = events.disconnected.add(move |_| f());
        }

        let breaker = CircuitBreaker::new(
            format!("subscription:{}", request.topic),
            config.breaker.clone(),
        );

        let core = Arc::new(ChannelCore {
            request,
            transport,
            breaker,
            retry: RetryOptions::new(config.retry.clone()).retry_on_transient(),
            auto_reconnect: options.auto_reconnect,
            max_retries: options.max_retries,
            retry_delay: options.retry_delay,
            max_retry_delay: config.max_retry_delay,
            status: RwLock::new(ChannelStatus::default()),
            events,
        });

        let channel = Self {
            id: Uuid::new_v4(),
            core,
            task: Mutex::new(None),
        };
        channel.spawn();
        channel
    }

    /// Returns the channel id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.core.request.topic
    }

    /// Returns the subscription document.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.core.request.query
    }

    /// Returns the query variables.
    #[must_use]
    pub fn variables(&self) -> &Value {
        &self.core.request.variables
    }

    /// Returns a status snapshot.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        self.core.status.read().clone()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.core.status.read().state
    }

    /// Returns true if connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Returns the retry count.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.core.status.read().retry_count
    }

    /// Returns the most recent error.
    #[must_use]
    pub fn last_error(&self) -> Option<SubscriptionError> {
        self.core.status.read().last_error.clone()
    }

    /// Registers an additional event listener.
    pub fn on_event<F>(&self, f: F) -> ListenerHandle
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.core.events.event.add(f)
    }

    /// Registers an additional error listener.
    pub fn on_error<F>(&self, f: F) -> ListenerHandle
    where
        F: Fn(&SubscriptionError) + Send + Sync + 'static,
    {
        self.core.events.error.add(f)
    }

    /// Stops the channel and releases its task and retry timer.
    pub fn disconnect(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }

        let was = {
            let mut status = self.core.status.write();
            std::mem::replace(&mut status.state, ChannelState::Disconnected)
        };

        if was != ChannelState::Disconnected {
            info!(topic = %self.core.request.topic, "subscription disconnected");
            self.core.events.disconnected.emit(&());
        }
    }

    /// Restarts the channel with a fresh retry budget.
    pub fn reconnect(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        {
            let mut status = self.core.status.write();
            status.retry_count = 0;
        }
        self.core.breaker.reset();
        debug!(topic = %self.core.request.topic, "subscription reconnecting");
        self.spawn();
    }

    fn spawn(&self) {
        let core = Arc::clone(&self.core);
        let task = tokio::spawn(async move { core.run().await });
        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
    }
}

impl Drop for SubscriptionChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl ChannelCore {
    async fn run(&self) {
        loop {
            self.set_state(ChannelState::Connecting);

            let opened = self
                .breaker
                .execute(|| with_retry(|| self.transport.open(&self.request), &self.retry))
                .await
                .map_err(SubscriptionError::from);

            let failure = match opened {
                Ok(mut stream) => {
                    self.mark_connected();
                    let mut failure = None;
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(event) => self.deliver(&event),
                            Err(err) => {
                                failure = Some(err);
                                break;
                            }
                        }
                    }
                    failure
                }
                Err(err) => Some(err),
            };

            let Some(err) = failure else {
                info!(topic = %self.request.topic, "subscription completed");
                self.set_state(ChannelState::Disconnected);
                self.events.disconnected.emit(&());
                return;
            };

            self.mark_error(err);

            let Some(retry) = self.next_retry() else {
                return;
            };
            let delay = backoff_delay(self.retry_delay, 2.0, retry, self.max_retry_delay);
            info!(
                topic = %self.request.topic,
                retry,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                "reopening subscription"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn next_retry(&self) -> Option<u32> {
        if !self.auto_reconnect {
            return None;
        }

        let mut status = self.status.write();
        if status.retry_count >= self.max_retries {
            error!(
                topic = %self.request.topic,
                retries = status.retry_count,
                "subscription retries exhausted"
            );
            return None;
        }
        status.retry_count += 1;
        Some(status.retry_count)
    }

    fn set_state(&self, state: ChannelState) {
        self.status.write().state = state;
    }

    fn mark_connected(&self) {
        {
            let mut status = self.status.write();
            status.state = ChannelState::Connected;
            status.last_error = None;
        }
        info!(topic = %self.request.topic, "subscription connected");
        self.events.connected.emit(&());
    }

    fn mark_error(&self, err: SubscriptionError) {
        {
            let mut status = self.status.write();
            status.state = ChannelState::Error;
            status.last_error = Some(err.clone());
        }
        warn!(topic = %self.request.topic, error = %err, "subscription error");
        self.events.error.emit(&err);
    }

    fn deliver(&self, event: &ChannelEvent) {
        {
            let mut status = self.status.write();
            if status.retry_count > 0 {
                status.retry_count = 0;
            }
        }
        self.events.event.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use rtlink_client::{CircuitBreakerConfig, RetryConfig};
    use serde_json::json;

    use super::*;
    use crate::transport::testing::MockTransport;

    fn config() -> SubscriptionConfig {
        SubscriptionConfig::default()
            .with_retry(RetryConfig {
                max_attempts: 1,
                max_jitter: Duration::ZERO,
                ..RetryConfig::default()
            })
            .with_breaker(CircuitBreakerConfig::default().with_failure_threshold(100))
    }

    fn request(topic: &str) -> SubscriptionRequest {
        SubscriptionRequest {
            topic: topic.to_string(),
            query: "subscription { x }".to_string(),
            variables: json!({ "userId": "u1" }),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_connects_and_delivers_events() {
        let transport = MockTransport::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connected = Arc::new(AtomicU32::new(0));
        let options = {
            let received = Arc::clone(&received);
            let connected = Arc::clone(&connected);
            SubscribeOptions::from_config(&config())
                .on_event(move |event| received.lock().push(event.payload.clone()))
                .on_connected(move || {
                    connected.fetch_add(1, Ordering::SeqCst);
                })
        };

        let channel = SubscriptionChannel::open(request("chat"), options, &config(), transport.clone());
        settle().await;
        assert!(channel.is_connected());
        assert_eq!(connected.load(Ordering::SeqCst), 1);

        assert!(transport.emit("chat", json!({ "action": "message" })));
        settle().await;
        assert_eq!(*received.lock(), vec![json!({ "action": "message" })]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_retries_with_backoff_then_recovers() {
        let transport = MockTransport::new();
        transport.fail_opens("chat", SubscriptionError::Connection("refused".to_string()), 2);

        let channel = SubscriptionChannel::open(
            request("chat"),
            SubscribeOptions::from_config(&config()),
            &config(),
            transport.clone(),
        );
        settle().await;
        assert_eq!(channel.state(), ChannelState::Error);
        assert_eq!(channel.retry_count(), 1);

        // first retry after 1s, second after 2s
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(transport.open_count("chat"), 2);
        assert_eq!(channel.retry_count(), 2);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(transport.open_count("chat"), 3);
        assert!(channel.is_connected());
        assert!(channel.last_error().is_none());

        transport.emit("chat", json!({ "status": "ok" }));
        settle().await;
        assert_eq!(channel.retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_gives_up_at_retry_ceiling() {
        let transport = MockTransport::new();
        transport.fail_opens("notes", SubscriptionError::Connection("down".to_string()), 10);
        let errors = Arc::new(AtomicU32::new(0));
        let options = {
            let errors = Arc::clone(&errors);
            SubscribeOptions::from_config(&config()).on_error(move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            })
        };

        let channel = SubscriptionChannel::open(request("notes"), options, &config(), transport.clone());
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(transport.open_count("notes"), 4);
        assert_eq!(errors.load(Ordering::SeqCst), 4);
        assert_eq!(channel.state(), ChannelState::Error);
        assert_eq!(channel.retry_count(), 3);
        assert_eq!(
            channel.last_error(),
            Some(SubscriptionError::RetryExhausted {
                attempts: 1,
                last: Box::new(SubscriptionError::Connection("down".to_string())),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_reopens_subscription() {
        let transport = MockTransport::new();
        let channel = SubscriptionChannel::open(
            request("general"),
            SubscribeOptions::from_config(&config()),
            &config(),
            transport.clone(),
        );
        settle().await;

        transport.break_stream("general", SubscriptionError::Connection("reset".to_string()));
        settle().await;
        assert_eq!(channel.state(), ChannelState::Error);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(channel.is_connected());
        assert_eq!(transport.open_count("general"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_reconnect_disabled() {
        let transport = MockTransport::new();
        let channel = SubscriptionChannel::open(
            request("general"),
            SubscribeOptions::from_config(&config()).with_auto_reconnect(false),
            &config(),
            transport.clone(),
        );
        settle().await;

        transport.break_stream("general", SubscriptionError::Server("boom".to_string()));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(channel.state(), ChannelState::Error);
        assert_eq!(transport.open_count("general"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_completion_disconnects_without_retry() {
        let transport = MockTransport::new();
        let disconnected = Arc::new(AtomicU32::new(0));
        let options = {
            let disconnected = Arc::clone(&disconnected);
            SubscribeOptions::from_config(&config()).on_disconnected(move || {
                disconnected.fetch_add(1, Ordering::SeqCst);
            })
        };
        let channel = SubscriptionChannel::open(request("chat"), options, &config(), transport.clone());
        settle().await;

        transport.complete("chat");
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
        assert_eq!(transport.open_count("chat"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_releases_stream_and_timers() {
        let transport = MockTransport::new();
        transport.fail_opens("chat", SubscriptionError::Connection("refused".to_string()), 1);
        let channel = SubscriptionChannel::open(
            request("chat"),
            SubscribeOptions::from_config(&config()),
            &config(),
            transport.clone(),
        );
        settle().await;
        assert_eq!(channel.state(), ChannelState::Error);

        channel.disconnect();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert_eq!(transport.open_count("chat"), 1);

        channel.reconnect();
        settle().await;
        assert!(channel.is_connected());
        assert!(transport.is_open("chat"));

        channel.disconnect();
        settle().await;
        assert!(!transport.is_open("chat"));
    }
}

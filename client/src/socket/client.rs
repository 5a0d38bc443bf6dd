//! Gateway socket client.
//!
//! [`SocketClient`] owns one physical connection at a time and drives the
//! connection state machine:
//!
//! ```text
//! Disconnected --connect--> Connecting --handshake--> Connected
//! Connected --unexpected close--> Disconnected --interval--> Connecting (attempt + 1)
//! Connected --disconnect()--> Disconnecting --> Disconnected
//! Connecting --timeout / failure--> Error
//! ```
//!
//! State lives behind a short synchronous lock. Everything that has to be
//! announced while the lock is held is collected as a notice and
//! published after the lock is released, so listeners may call back into
//! the client.

use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::queue::MessageQueue;
use super::state::{ConnectionState, ConnectionStatus};
use super::transport::{
    CloseInfo, Connector, TransportCommand, TransportEvent, TransportLink, TungsteniteConnector,
};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::messages::{InboundMessage, OutboundMessage};
use crate::metrics::ClientMetrics;
use crate::observer::{ListenerHandle, Listeners};

#[derive(Default)]
struct SocketEvents {
    state_change: Listeners<ConnectionState>,
    connect: Listeners<()>,
    disconnect: Listeners<CloseInfo>,
    message: Listeners<InboundMessage>,
    error: Listeners<ClientError>,
    reconnecting: Listeners<u32>,
    reconnect_failed: Listeners<()>,
}

enum Notice {
    State(ConnectionState),
    Connected,
    Disconnected(CloseInfo),
    Error(ClientError),
    Reconnecting(u32),
    ReconnectFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Manual,
    Reconnect,
}

struct Shared {
    state: ConnectionState,
    queue: MessageQueue,
    link: Option<mpsc::UnboundedSender<TransportCommand>>,
    link_id: u64,
    generation: u64,
    manual_disconnect: bool,
    reconnect_failed_notified: bool,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl Shared {
    fn transmit(&self, text: String) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.send(TransportCommand::Send(text)).is_ok())
    }

    fn abort_tasks(&mut self) {
        for task in [
            self.reader.take(),
            self.heartbeat.take(),
            self.reconnect.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    shared: Mutex<Shared>,
    events: SocketEvents,
    metrics: Arc<ClientMetrics>,
    epoch: watch::Sender<u64>,
    status: watch::Sender<ConnectionStatus>,
}

/// Resilient client for one gateway connection.
///
/// Cloning yields another handle to the same connection. Background tasks
/// hold only weak references; dropping the last handle aborts them and
/// closes the transport.
#[derive(Clone)]
pub struct SocketClient {
    inner: Arc<Inner>,
}

/// Non-owning handle to a [`SocketClient`].
#[derive(Clone)]
pub struct WeakSocketClient {
    inner: Weak<Inner>,
}

impl WeakSocketClient {
    /// Returns the client if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<SocketClient> {
        self.inner.upgrade().map(|inner| SocketClient { inner })
    }
}

impl std::fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketClient")
            .field("url", &self.inner.config.url)
            .field("status", &self.status())
            .finish()
    }
}

impl std::fmt::Debug for WeakSocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakSocketClient").finish_non_exhaustive()
    }
}

impl SocketClient {
    /// Creates a client that opens connections through `connector`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self, ClientError> {
        config.validate()?;

        let shared = Shared {
            state: ConnectionState::default(),
            queue: MessageQueue::new(config.queue_capacity),
            link: None,
            link_id: 0,
            generation: 0,
            manual_disconnect: false,
            reconnect_failed_notified: false,
            reader: None,
            heartbeat: None,
            reconnect: None,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                connector,
                shared: Mutex::new(shared),
                events: SocketEvents::default(),
                metrics: Arc::new(ClientMetrics::new()),
                epoch: watch::Sender::new(0),
                status: watch::Sender::new(ConnectionStatus::Disconnected),
            }),
        })
    }

    /// Creates a WebSocket client for `url` with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_url(url: impl Into<String>) -> Result<Self, ClientError> {
        Self::new(ClientConfig::new(url), Arc::new(TungsteniteConnector))
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the shared metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<ClientMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Returns a snapshot of the connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state.clone()
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.shared.lock().state.status
    }

    /// Returns true if connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Returns the gateway-assigned connection id.
    #[must_use]
    pub fn connection_id(&self) -> Option<String> {
        self.inner.shared.lock().state.connection_id.clone()
    }

    /// Subscribes to status changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Connects to the gateway.
    ///
    /// Resolves once connected. If an attempt is already in flight this
    /// waits for it instead of opening a second connection. A failed
    /// connect is not retried automatically.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionTimeout`] if the handshake does not
    /// complete in time, [`ClientError::Aborted`] if `disconnect()` is called
    /// meanwhile, or the connector's error.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.inner.connect().await
    }

    /// Closes the connection and suppresses automatic reconnection.
    ///
    /// Idempotent. A pending `connect()` fails with [`ClientError::Aborted`].
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Sends a message, or queues it while not connected.
    ///
    /// Returns true if the message was handed to the transport.
    pub fn send(&self, message: &OutboundMessage) -> bool {
        self.inner.send(message)
    }

    /// Sends queued messages in order. Returns the number sent.
    pub fn flush_queue(&self) -> usize {
        self.inner.flush_queue()
    }

    /// Returns the number of queued messages.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.shared.lock().queue.len()
    }

    /// Returns a copy of the queued messages, oldest first.
    #[must_use]
    pub fn queued_messages(&self) -> Vec<OutboundMessage> {
        self.inner.shared.lock().queue.iter().cloned().collect()
    }

    /// Sets the user id carried in the connection state.
    pub fn set_user_id(&self, user_id: Option<String>) {
        self.inner.update_state(|state| {
            state.user_id = user_id;
            true
        });
    }

    /// Sets the session id carried in the connection state.
    pub fn set_session_id(&self, session_id: Option<String>) {
        self.inner.update_state(|state| {
            state.session_id = session_id;
            true
        });
    }

    /// Records the gateway-assigned connection id. Ignored unless connected.
    pub fn set_connection_id(&self, connection_id: impl Into<String>) {
        let connection_id = connection_id.into();
        self.inner.update_state(|state| {
            if !state.is_connected() {
                return false;
            }
            state.connection_id = Some(connection_id);
            true
        });
    }

    /// Registers a state change listener.
    pub fn on_state_change<F>(&self, f: F) -> ListenerHandle
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.inner.events.state_change.add(f)
    }

    /// Registers a listener for successful connects.
    pub fn on_connect<F>(&self, f: F) -> ListenerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.events.connect.add(move |_| f())
    }

    /// Registers a listener for closed connections.
    pub fn on_disconnect<F>(&self, f: F) -> ListenerHandle
    where
        F: Fn(&CloseInfo) + Send + Sync + 'static,
    {
        self.inner.events.disconnect.add(f)
    }

    /// Registers a listener for every decoded inbound message.
    pub fn on_message<F>(&self, f: F) -> ListenerHandle
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.inner.events.message.add(f)
    }

    /// Registers an error listener.
    pub fn on_error<F>(&self, f: F) -> ListenerHandle
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.inner.events.error.add(f)
    }

    /// Registers a listener called with the attempt number before each reconnect wait.
    pub fn on_reconnecting<F>(&self, f: F) -> ListenerHandle
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.inner.events.reconnecting.add(move |attempt| f(*attempt))
    }

    /// Registers a listener called once when reconnection gives up.
    pub fn on_reconnect_failed<F>(&self, f: F) -> ListenerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.events.reconnect_failed.add(move |_| f())
    }

    /// Returns a non-owning handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakSocketClient {
        WeakSocketClient {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Inner {
    async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        let in_flight = {
            let mut shared = self.shared.lock();
            match shared.state.status {
                ConnectionStatus::Connected => return Ok(()),
                ConnectionStatus::Connecting => true,
                _ => {
                    if let Some(timer) = shared.reconnect.take() {
                        timer.abort();
                    }
                    shared.manual_disconnect = false;
                    false
                }
            }
        };

        if in_flight {
            debug!("connect already in flight; waiting for it");
            return self.await_in_flight().await;
        }

        self.attempt(Origin::Manual).await
    }

    async fn await_in_flight(&self) -> Result<(), ClientError> {
        let mut status = self.status.subscribe();
        let settled = status
            .wait_for(|s| *s != ConnectionStatus::Connecting)
            .await
            .map(|s| *s);

        match settled {
            Ok(ConnectionStatus::Connected) => Ok(()),
            _ => Err(ClientError::NotConnected),
        }
    }

    async fn attempt(self: &Arc<Self>, origin: Origin) -> Result<(), ClientError> {
        // The epoch is read under the same lock that fixes the generation, so
        // only a disconnect issued after this point aborts the attempt.
        let (generation, mut epoch, notices) = {
            let mut shared = self.shared.lock();
            if origin == Origin::Reconnect {
                if shared.manual_disconnect {
                    return Err(ClientError::Aborted);
                }
                shared.reconnect.take();
            }
            let notices = self.transition(&mut shared, ConnectionStatus::Connecting);
            (shared.generation, self.epoch.subscribe(), notices)
        };
        self.publish(notices);

        let url = self.config.connection_url();
        let timeout = self.config.connection_timeout;
        info!(url = %self.config.url, origin = ?origin, "connecting to gateway");

        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, self.connector.connect(&url)) => Some(result),
            _ = epoch.wait_for(|current| *current != generation) => None,
        };

        match outcome {
            None => {
                debug!("connect aborted by disconnect");
                Err(ClientError::Aborted)
            }
            Some(Err(_elapsed)) => {
                let err = ClientError::ConnectionTimeout(timeout);
                self.fail(generation, err.clone());
                Err(err)
            }
            Some(Ok(Err(err))) => {
                self.fail(generation, err.clone());
                Err(err)
            }
            Some(Ok(Ok(link))) => self.open(generation, link),
        }
    }

    fn fail(&self, generation: u64, err: ClientError) {
        let notices = {
            let mut shared = self.shared.lock();
            if shared.generation != generation
                || shared.state.status != ConnectionStatus::Connecting
            {
                return;
            }
            let mut notices = self.transition(&mut shared, ConnectionStatus::Error);
            notices.push(Notice::Error(err.clone()));
            notices
        };
        warn!(error = %err, "connect attempt failed");
        self.publish(notices);
    }

    fn open(self: &Arc<Self>, generation: u64, link: TransportLink) -> Result<(), ClientError> {
        let TransportLink { outbound, inbound } = link;

        let notices = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                let _ = outbound.send(TransportCommand::Close);
                return Err(ClientError::Aborted);
            }

            shared.link_id += 1;
            let link_id = shared.link_id;
            shared.link = Some(outbound);
            shared.reconnect_failed_notified = false;
            shared.reader = Some(self.spawn_reader(inbound, link_id));
            shared.heartbeat = Some(self.spawn_heartbeat(link_id));

            let mut notices = self.transition(&mut shared, ConnectionStatus::Connected);
            notices.push(Notice::Connected);
            notices
        };

        self.metrics.record_connection_opened();
        info!(url = %self.config.url, "connected to gateway");
        self.publish(notices);
        Ok(())
    }

    fn spawn_reader(
        self: &Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
        link_id: u64,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match event {
                    TransportEvent::Frame(text) => inner.handle_frame(&text),
                    TransportEvent::Error(message) => inner.handle_transport_error(message),
                    TransportEvent::Closed(info) => {
                        inner.handle_close(link_id, info);
                        return;
                    }
                }
            }
            if let Some(inner) = weak.upgrade() {
                inner.handle_close(link_id, CloseInfo::abnormal());
            }
        })
    }

    fn spawn_heartbeat(self: &Arc<Self>, link_id: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !inner.send_ping(link_id) {
                    break;
                }
            }
        })
    }

    fn send_ping(&self, link_id: u64) -> bool {
        let text = match OutboundMessage::ping().to_json() {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "failed to encode ping");
                return true;
            }
        };

        let shared = self.shared.lock();
        if shared.link_id != link_id || !shared.state.is_connected() {
            return false;
        }
        if shared.transmit(text) {
            self.metrics.record_message_sent();
            debug!("heartbeat ping sent");
        }
        true
    }

    fn handle_frame(&self, text: &str) {
        self.metrics.record_frame_received();

        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                self.metrics.record_malformed_frame();
                warn!(error = %err, "dropping malformed frame");
                return;
            }
        };

        if message.is_pong() {
            let mut shared = self.shared.lock();
            if shared.state.is_connected() {
                shared.state.last_connected = Some(Utc::now());
            }
        }

        debug!(action = %message.action, "message received");
        self.events.message.emit(&message);
    }

    fn handle_transport_error(&self, message: String) {
        warn!(error = %message, "transport error");
        self.events.error.emit(&ClientError::Transport(message));
    }

    fn handle_close(self: &Arc<Self>, link_id: u64, info: CloseInfo) {
        let notices = {
            let mut shared = self.shared.lock();
            if shared.link_id != link_id || shared.link.is_none() {
                return;
            }
            shared.link = None;
            shared.reader.take();
            if let Some(heartbeat) = shared.heartbeat.take() {
                heartbeat.abort();
            }

            let mut notices = self.transition(&mut shared, ConnectionStatus::Disconnected);
            notices.push(Notice::Disconnected(info.clone()));

            if shared.manual_disconnect || info.is_normal() {
                info!(code = ?info.code, "gateway closed the connection");
            } else {
                warn!(code = ?info.code, reason = %info.reason, "connection lost");
                notices.extend(self.schedule_reconnect(&mut shared));
            }
            notices
        };

        self.metrics.record_connection_closed();
        self.publish(notices);
    }

    fn schedule_reconnect(self: &Arc<Self>, shared: &mut Shared) -> Vec<Notice> {
        let max = self.config.max_reconnect_attempts;
        if shared.state.reconnect_attempts >= max {
            let mut notices = self.transition(shared, ConnectionStatus::Error);
            if !shared.reconnect_failed_notified {
                shared.reconnect_failed_notified = true;
                error!(attempts = max, "reconnect attempts exhausted");
                notices.push(Notice::Error(ClientError::ReconnectExhausted(max)));
                notices.push(Notice::ReconnectFailed);
            }
            return notices;
        }

        shared.state.reconnect_attempts += 1;
        let attempt = shared.state.reconnect_attempts;
        let generation = shared.generation;
        let delay = self.config.reconnect_interval;
        self.metrics.record_reconnect_attempt();
        info!(attempt, max, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        let weak = Arc::downgrade(self);
        shared.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.reconnect(generation).await;
            }
        }));

        vec![Notice::Reconnecting(attempt)]
    }

    async fn reconnect(self: &Arc<Self>, generation: u64) {
        let err = match self.attempt(Origin::Reconnect).await {
            Ok(()) => return,
            Err(ClientError::Aborted) => return,
            Err(err) => err,
        };

        debug!(error = %err, "reconnect attempt failed");
        let notices = {
            let mut shared = self.shared.lock();
            if shared.generation != generation || shared.manual_disconnect {
                return;
            }
            self.schedule_reconnect(&mut shared)
        };
        self.publish(notices);
    }

    fn disconnect(&self) {
        let (notices, link) = {
            let mut shared = self.shared.lock();
            shared.manual_disconnect = true;
            shared.generation += 1;
            self.epoch.send_replace(shared.generation);
            shared.abort_tasks();
            let link = shared.link.take();

            let mut notices = Vec::new();
            match shared.state.status {
                ConnectionStatus::Connected => {
                    notices.extend(self.transition(&mut shared, ConnectionStatus::Disconnecting));
                    notices.extend(self.transition(&mut shared, ConnectionStatus::Disconnected));
                    notices.push(Notice::Disconnected(CloseInfo::manual()));
                }
                ConnectionStatus::Disconnected => {}
                _ => {
                    notices.extend(self.transition(&mut shared, ConnectionStatus::Disconnected));
                }
            }
            (notices, link)
        };

        if let Some(link) = link {
            let _ = link.send(TransportCommand::Close);
            self.metrics.record_connection_closed();
            info!(url = %self.config.url, "disconnected from gateway");
        }
        self.publish(notices);
    }

    fn send(&self, message: &OutboundMessage) -> bool {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(err) => {
                warn!(action = %message.action, error = %err, "failed to encode message");
                return false;
            }
        };

        let mut shared = self.shared.lock();
        if shared.state.is_connected() && shared.transmit(text) {
            self.metrics.record_message_sent();
            return true;
        }

        if shared.queue.push(message.clone()).is_some() {
            self.metrics.record_message_dropped();
            debug!(capacity = shared.queue.capacity(), "queue full; dropped oldest message");
        }
        self.metrics.record_message_queued();
        debug!(action = %message.action, queued = shared.queue.len(), "message queued");
        false
    }

    fn flush_queue(&self) -> usize {
        let mut shared = self.shared.lock();
        if !shared.state.is_connected() {
            return 0;
        }

        let mut sent = 0;
        while let Some(message) = shared.queue.front() {
            match message.to_json() {
                Ok(text) => {
                    if !shared.transmit(text) {
                        break;
                    }
                    sent += 1;
                    self.metrics.record_message_sent();
                }
                Err(err) => {
                    warn!(action = %message.action, error = %err, "dropping unencodable message");
                }
            }
            shared.queue.pop();
        }

        if sent > 0 {
            info!(sent, remaining = shared.queue.len(), "flushed queued messages");
        }
        sent
    }

    fn update_state(&self, apply: impl FnOnce(&mut ConnectionState) -> bool) {
        let snapshot = {
            let mut shared = self.shared.lock();
            if !apply(&mut shared.state) {
                return;
            }
            shared.state.clone()
        };
        self.events.state_change.emit(&snapshot);
    }

    fn transition(&self, shared: &mut Shared, to: ConnectionStatus) -> Vec<Notice> {
        let from = shared.state.status;
        if from == to {
            return Vec::new();
        }

        if from == ConnectionStatus::Connected {
            shared.state.connection_id = None;
        }
        if to == ConnectionStatus::Connected {
            shared.state.last_connected = Some(Utc::now());
            shared.state.reconnect_attempts = 0;
        }
        shared.state.status = to;
        self.status.send_replace(to);

        debug!(%from, %to, "connection state changed");
        vec![Notice::State(shared.state.clone())]
    }

    fn publish(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice {
                Notice::State(state) => self.events.state_change.emit(&state),
                Notice::Connected => self.events.connect.emit(&()),
                Notice::Disconnected(info) => self.events.disconnect.emit(&info),
                Notice::Error(err) => self.events.error.emit(&err),
                Notice::Reconnecting(attempt) => self.events.reconnecting.emit(&attempt),
                Notice::ReconnectFailed => self.events.reconnect_failed.emit(&()),
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut();
        shared.abort_tasks();
        if let Some(link) = shared.link.take() {
            let _ = link.send(TransportCommand::Close);
        }
    }
}

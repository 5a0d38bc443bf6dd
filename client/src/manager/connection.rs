//! Connection manager for one logical session.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::handlers::{HandlerRegistry, HandlerResult};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::messages::{actions, InboundMessage, OutboundMessage};
use crate::metrics::ClientMetrics;
use crate::observer::ListenerHandle;
use crate::socket::{ConnectionState, Connector, SocketClient, TungsteniteConnector};

/// Owns one [`SocketClient`] and the handlers for its messages.
///
/// Every outbound message is stamped with the manager's current user and
/// session ids, overriding whatever the caller set. On connect the manager
/// announces itself with a `connect` action, and a `connection_established`
/// reply records the gateway-assigned connection id.
pub struct ConnectionManager {
    client: SocketClient,
    handlers: HandlerRegistry,
    wiring: Mutex<Vec<ListenerHandle>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("client", &self.client)
            .field("handlers", &self.handlers)
            .finish()
    }
}

impl ConnectionManager {
    /// Creates a manager with its own socket client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self, ClientError> {
        Ok(Self::with_client(SocketClient::new(config, connector)?))
    }

    /// Creates a WebSocket manager for `url` with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_url(url: impl Into<String>) -> Result<Self, ClientError> {
        Self::new(ClientConfig::new(url), Arc::new(TungsteniteConnector))
    }

    /// Creates a WebSocket manager from `RTLINK_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is malformed or the configuration is invalid.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?, Arc::new(TungsteniteConnector))
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(client: SocketClient) -> Self {
        let handlers = HandlerRegistry::new();

        let announce = {
            let weak = client.downgrade();
            client.on_connect(move || {
                if let Some(client) = weak.upgrade() {
                    let state = client.state();
                    let hello = OutboundMessage::new(actions::CONNECT)
                        .enriched(state.user_id, state.session_id);
                    client.send(&hello);
                    debug!("sent connect announcement");
                }
            })
        };

        let dispatch = {
            let weak = client.downgrade();
            let handlers = handlers.clone();
            let metrics = client.metrics();
            client.on_message(move |message| {
                if message.action == actions::CONNECTION_ESTABLISHED {
                    if let (Some(id), Some(client)) = (message.connection_id(), weak.upgrade()) {
                        info!(connection_id = id, "gateway assigned connection id");
                        client.set_connection_id(id);
                    }
                }
                let outcome = handlers.dispatch(message);
                metrics.record_handler_failures(outcome.failed());
            })
        };

        Self {
            client,
            handlers,
            wiring: Mutex::new(vec![announce, dispatch]),
        }
    }

    /// Returns the underlying socket client.
    #[must_use]
    pub fn client(&self) -> &SocketClient {
        &self.client
    }

    /// Returns the client metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<ClientMetrics> {
        self.client.metrics()
    }

    /// Connects the underlying client.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.client.connect().await
    }

    /// Disconnects the underlying client.
    pub fn disconnect(&self) {
        self.client.disconnect();
    }

    /// Disconnects and drops every handler.
    pub fn shutdown(&self) {
        self.client.disconnect();
        self.handlers.clear();
        for handle in self.wiring.lock().drain(..) {
            handle.unsubscribe();
        }
    }

    /// Returns a snapshot of the connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    /// Returns true if connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Returns the gateway-assigned connection id.
    #[must_use]
    pub fn connection_id(&self) -> Option<String> {
        self.client.connection_id()
    }

    /// Sets the user id stamped on outbound messages.
    pub fn set_user_id(&self, user_id: Option<String>) {
        self.client.set_user_id(user_id);
    }

    /// Sets the session id stamped on outbound messages.
    pub fn set_session_id(&self, session_id: Option<String>) {
        self.client.set_session_id(session_id);
    }

    /// Sends `message` with the current identity.
    ///
    /// Returns true if transmitted, false if queued.
    pub fn send(&self, message: OutboundMessage) -> bool {
        let state = self.client.state();
        let message = message.enriched(state.user_id, state.session_id);
        self.client.send(&message)
    }

    /// Sends audio as a base64 `voice_message`.
    pub fn send_voice_message(&self, audio: &[u8], session_id: Option<&str>) -> bool {
        let mut data = self.session_data(session_id);
        data.insert("audioData".to_string(), Value::String(STANDARD.encode(audio)));
        self.send(OutboundMessage::new(actions::VOICE_MESSAGE).with_data(Value::Object(data)))
    }

    /// Sends a `text_message`.
    pub fn send_text_message(&self, text: &str, session_id: Option<&str>) -> bool {
        let mut data = self.session_data(session_id);
        data.insert("text".to_string(), Value::String(text.to_string()));
        self.send(OutboundMessage::new(actions::TEXT_MESSAGE).with_data(Value::Object(data)))
    }

    /// Asks the gateway to open a voice session.
    pub fn start_voice_session(&self) -> bool {
        self.send(OutboundMessage::new(actions::START_VOICE_SESSION))
    }

    /// Asks the gateway to close a voice session.
    pub fn end_voice_session(&self, session_id: Option<&str>) -> bool {
        let data = self.session_data(session_id);
        self.send(OutboundMessage::new(actions::END_VOICE_SESSION).with_data(Value::Object(data)))
    }

    /// Sends a heartbeat ping.
    pub fn send_ping(&self) -> bool {
        self.send(OutboundMessage::ping())
    }

    /// Registers a handler for `action`.
    pub fn on_message<F>(&self, action: impl Into<String>, handler: F) -> ListenerHandle
    where
        F: Fn(&InboundMessage) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.register(action, handler)
    }

    /// Registers a listener for every connection state change.
    pub fn on_connection_state_change<F>(&self, f: F) -> ListenerHandle
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.client.on_state_change(f)
    }

    fn session_data(&self, session_id: Option<&str>) -> Map<String, Value> {
        let session_id = session_id
            .map(str::to_string)
            .or_else(|| self.client.state().session_id);

        let mut data = Map::new();
        if let Some(session_id) = session_id {
            data.insert("sessionId".to_string(), Value::String(session_id));
        }
        data
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for handle in self.wiring.get_mut().drain(..) {
            handle.unsubscribe();
        }
    }
}

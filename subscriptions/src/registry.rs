//! Per-user set of subscription channels.
//!
//! The registry owns every channel it creates and tears them down together.
//! Standing topics are opened by [`SubscriptionRegistry::start`] and the
//! voice topic by [`SubscriptionRegistry::start_voice_session`]; their events
//! are routed to listeners registered with [`SubscriptionRegistry::on_event`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rtlink_client::{ListenerHandle, Listeners};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::channel::{ChannelState, SubscribeOptions, SubscriptionChannel};
use crate::config::SubscriptionConfig;
use crate::error::SubscriptionError;
use crate::topics::Topic;
use crate::transport::{ChannelEvent, GraphqlWsTransport, SubscriptionRequest, SubscriptionTransport};

#[derive(Debug, Clone)]
struct Scoped {
    scope_id: String,
    channels: Vec<(Topic, Uuid)>,
}

impl Scoped {
    fn find(&self, topic: Topic) -> Option<Uuid> {
        self.channels
            .iter()
            .find(|(owned, _)| *owned == topic)
            .map(|(_, id)| *id)
    }

    fn ids(&self) -> Vec<Uuid> {
        self.channels.iter().map(|(_, id)| *id).collect()
    }

    fn forget(&mut self, id: Uuid) -> bool {
        let before = self.channels.len();
        self.channels.retain(|(_, owned)| *owned != id);
        self.channels.len() != before
    }
}

/// Owns the subscription channels of one signed-in user.
pub struct SubscriptionRegistry {
    config: SubscriptionConfig,
    transport: Arc<dyn SubscriptionTransport>,
    channels: RwLock<Vec<Arc<SubscriptionChannel>>>,
    standing: Mutex<Option<Scoped>>,
    voice: Mutex<Option<Scoped>>,
    routes: HashMap<Topic, Listeners<ChannelEvent>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("url", &self.config.url)
            .field("channels", &self.channels.read().len())
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: SubscriptionConfig,
        transport: Arc<dyn SubscriptionTransport>,
    ) -> Result<Self, SubscriptionError> {
        config.validate()?;

        let routes = [
            Topic::General,
            Topic::Chat,
            Topic::UiControl,
            Topic::Notes,
            Topic::VoiceSession,
        ]
        .into_iter()
        .map(|topic| (topic, Listeners::new()))
        .collect();

        Ok(Self {
            config,
            transport,
            channels: RwLock::new(Vec::new()),
            standing: Mutex::new(None),
            voice: Mutex::new(None),
            routes,
        })
    }

    /// Creates a registry speaking `graphql-transport-ws` to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not a WebSocket URL.
    pub fn with_url(url: impl Into<String>) -> Result<Self, SubscriptionError> {
        Self::with_config(SubscriptionConfig::new(url))
    }

    /// Creates a registry speaking `graphql-transport-ws` with `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_config(config: SubscriptionConfig) -> Result<Self, SubscriptionError> {
        let transport = Arc::new(GraphqlWsTransport::new(&config));
        Self::new(config, transport)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    /// Opens a channel and returns its id.
    ///
    /// Must be called within a Tokio runtime.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        query: impl Into<String>,
        variables: Value,
        options: SubscribeOptions,
    ) -> Uuid {
        let request = SubscriptionRequest {
            topic: topic.into(),
            query: query.into(),
            variables,
        };
        debug!(topic = %request.topic, "subscribing");

        let channel = Arc::new(SubscriptionChannel::open(
            request,
            options,
            &self.config,
            Arc::clone(&self.transport),
        ));
        let id = channel.id();
        self.channels.write().push(channel);
        id
    }

    /// Tears down one channel. Returns false if the id is unknown.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        if let Some(standing) = self.standing.lock().as_mut() {
            standing.forget(id);
        }
        {
            let mut voice = self.voice.lock();
            if voice.as_mut().is_some_and(|current| current.forget(id)) {
                voice.take();
            }
        }

        let Some(channel) = self.detach(&[id]).pop() else {
            return false;
        };
        debug!(topic = %channel.topic(), %id, "unsubscribing");
        channel.disconnect();
        true
    }

    /// Opens the standing topics for `user_id`.
    ///
    /// Calling again for the same user keeps the channels still owned and
    /// reopens any that were unsubscribed; a different user replaces them.
    pub fn start(&self, user_id: &str) -> Vec<Uuid> {
        let (ids, replaced) = {
            let mut standing = self.standing.lock();
            let (kept, replaced) = match standing.take() {
                Some(current) if current.scope_id == user_id => (Some(current), Vec::new()),
                Some(previous) => {
                    info!(user_id = %previous.scope_id, "replacing standing subscriptions");
                    (None, self.detach(&previous.ids()))
                }
                None => (None, Vec::new()),
            };

            let channels: Vec<(Topic, Uuid)> = Topic::STANDING
                .into_iter()
                .map(|topic| {
                    let id = kept
                        .as_ref()
                        .and_then(|current| current.find(topic))
                        .unwrap_or_else(|| self.subscribe_topic(topic, user_id));
                    (topic, id)
                })
                .collect();

            let scoped = Scoped {
                scope_id: user_id.to_string(),
                channels,
            };
            let ids = scoped.ids();
            *standing = Some(scoped);
            (ids, replaced)
        };

        for channel in replaced {
            channel.disconnect();
        }
        info!(user_id, channels = ids.len(), "standing subscriptions started");
        ids
    }

    /// Opens the voice topic for `session_id`, replacing any other session.
    pub fn start_voice_session(&self, session_id: &str) -> Uuid {
        let (id, replaced) = {
            let mut voice = self.voice.lock();
            if let Some(id) = voice
                .as_ref()
                .filter(|current| current.scope_id == session_id)
                .and_then(|current| current.find(Topic::VoiceSession))
            {
                return id;
            }

            let replaced = voice
                .take()
                .map(|previous| self.detach(&previous.ids()))
                .unwrap_or_default();
            let id = self.subscribe_topic(Topic::VoiceSession, session_id);
            *voice = Some(Scoped {
                scope_id: session_id.to_string(),
                channels: vec![(Topic::VoiceSession, id)],
            });
            (id, replaced)
        };

        for channel in replaced {
            channel.disconnect();
        }
        info!(session_id, "voice subscription started");
        id
    }

    /// Closes the voice topic. Returns false if none was open.
    pub fn end_voice_session(&self) -> bool {
        let Some(previous) = self.voice.lock().take() else {
            return false;
        };
        info!(session_id = %previous.scope_id, "voice subscription ended");
        for channel in self.detach(&previous.ids()) {
            channel.disconnect();
        }
        true
    }

    /// Registers a listener for events on a standing or voice topic.
    pub fn on_event<F>(&self, topic: Topic, f: F) -> ListenerHandle
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        match self.routes.get(&topic) {
            Some(listeners) => listeners.add(f),
            None => ListenerHandle::noop(),
        }
    }

    /// Restarts every channel with a fresh retry budget.
    pub fn reconnect_all(&self) {
        for channel in self.snapshot() {
            channel.reconnect();
        }
    }

    /// Disconnects every channel, keeping them owned by the registry.
    pub fn disconnect_all(&self) {
        for channel in self.snapshot() {
            channel.disconnect();
        }
    }

    /// Disconnects one channel. Returns false if the id is unknown.
    pub fn disconnect(&self, id: Uuid) -> bool {
        self.channel(id).map(|channel| channel.disconnect()).is_some()
    }

    /// Restarts one channel. Returns false if the id is unknown.
    pub fn reconnect(&self, id: Uuid) -> bool {
        self.channel(id).map(|channel| channel.reconnect()).is_some()
    }

    /// Returns true if the registry has channels and every one is connected.
    ///
    /// Once started, the standing set must also still own every standing topic.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let standing_complete = self.standing.lock().as_ref().map_or(true, |standing| {
            Topic::STANDING
                .into_iter()
                .all(|topic| standing.find(topic).is_some())
        });

        let channels = self.channels.read();
        standing_complete
            && !channels.is_empty()
            && channels.iter().all(|channel| channel.is_connected())
    }

    /// Returns the first channel error in creation order.
    #[must_use]
    pub fn error(&self) -> Option<SubscriptionError> {
        self.channels
            .read()
            .iter()
            .find_map(|channel| channel.last_error())
    }

    /// Returns the state of one channel.
    #[must_use]
    pub fn channel_state(&self, id: Uuid) -> Option<ChannelState> {
        self.channel(id).map(|channel| channel.state())
    }

    /// Returns channel ids in creation order.
    #[must_use]
    pub fn channel_ids(&self) -> Vec<Uuid> {
        self.channels.read().iter().map(|channel| channel.id()).collect()
    }

    /// Returns one channel.
    #[must_use]
    pub fn channel(&self, id: Uuid) -> Option<Arc<SubscriptionChannel>> {
        self.channels
            .read()
            .iter()
            .find(|channel| channel.id() == id)
            .cloned()
    }

    /// Returns the number of owned channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// Returns true if the registry owns no channels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    /// Tears down every channel.
    pub fn shutdown(&self) {
        self.standing.lock().take();
        self.voice.lock().take();

        let channels = std::mem::take(&mut *self.channels.write());
        if channels.is_empty() {
            return;
        }
        info!(channels = channels.len(), "shutting down subscriptions");
        for channel in channels {
            channel.disconnect();
        }
    }

    fn subscribe_topic(&self, topic: Topic, scope_id: &str) -> Uuid {
        let mut options = SubscribeOptions::from_config(&self.config);
        if let Some(route) = self.routes.get(&topic).cloned() {
            options = options.on_event(move |event| route.emit(event));
        }
        self.subscribe(topic.name(), topic.query(), topic.variables(scope_id), options)
    }

    fn detach(&self, ids: &[Uuid]) -> Vec<Arc<SubscriptionChannel>> {
        let mut channels = self.channels.write();
        let (detached, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *channels)
            .into_iter()
            .partition(|channel| ids.contains(&channel.id()));
        *channels = kept;
        detached
    }

    fn snapshot(&self) -> Vec<Arc<SubscriptionChannel>> {
        self.channels.read().clone()
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

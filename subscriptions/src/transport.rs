//! Subscription transport.
//!
//! A [`SubscriptionTransport`] opens one subscription and returns its
//! events as a stream. The stream yields `Err` when the subscription breaks
//! and ends when the server completes it.
//!
//! [`GraphqlWsTransport`] speaks the `graphql-transport-ws` sub-protocol
//! with one socket per subscription.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{BoxStream, SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::SubscriptionConfig;
use crate::error::SubscriptionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Stream of events for one open subscription.
pub type EventStream = BoxStream<'static, Result<ChannelEvent, SubscriptionError>>;

/// Sub-protocol negotiated in the handshake.
pub const GRAPHQL_TRANSPORT_WS: &str = "graphql-transport-ws";

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    /// Topic name.
    pub topic: String,
    /// Subscription document.
    pub query: String,
    /// Query variables.
    pub variables: Value,
}

/// One pushed event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    /// Event body: `{status|action, data|content, ...}`.
    pub payload: Value,
    /// Time the event was received.
    pub timestamp: DateTime<Utc>,
}

impl ChannelEvent {
    /// Creates an event stamped now.
    #[must_use]
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Extracts the event from a `next` payload, unwrapping the single root field.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::Server`] if the payload carries errors.
    pub fn from_execution_result(result: Value) -> Result<Self, SubscriptionError> {
        if let Some(errors) = result.get("errors").filter(|e| !e.is_null()) {
            return Err(SubscriptionError::Server(errors.to_string()));
        }

        let payload = match result.get("data").and_then(Value::as_object) {
            Some(data) if data.len() == 1 => data.values().next().cloned().unwrap_or(Value::Null),
            Some(data) => Value::Object(data.clone()),
            None => result,
        };
        Ok(Self::new(payload))
    }

    /// Returns `payload.status`.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.payload.get("status")?.as_str()
    }

    /// Returns `payload.action`.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.payload.get("action")?.as_str()
    }

    /// Returns `payload.data`.
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.payload.get("data")
    }

    /// Returns `payload.content`.
    #[must_use]
    pub fn content(&self) -> Option<&Value> {
        self.payload.get("content")
    }
}

/// Opens subscriptions.
#[async_trait]
pub trait SubscriptionTransport: Send + Sync + 'static {
    /// Opens `request` and returns its event stream.
    async fn open(&self, request: &SubscriptionRequest) -> Result<EventStream, SubscriptionError>;
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame<'a> {
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Subscribe {
        id: &'a str,
        payload: SubscribePayload<'a>,
    },
    Complete {
        id: &'a str,
    },
    Pong,
}

#[derive(Debug, Serialize)]
struct SubscribePayload<'a> {
    query: &'a str,
    variables: &'a Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    ConnectionAck,
    Next { id: String, payload: Value },
    Error { id: String, payload: Value },
    Complete { id: String },
    Ping,
    Pong,
}

impl ClientFrame<'_> {
    fn message(&self) -> Result<Message, SubscriptionError> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

/// `graphql-transport-ws` transport, one socket per subscription.
#[derive(Debug, Clone)]
pub struct GraphqlWsTransport {
    url: String,
    auth_token: Option<String>,
    ack_timeout: Duration,
}

impl GraphqlWsTransport {
    /// Creates a transport for the configured endpoint.
    #[must_use]
    pub fn new(config: &SubscriptionConfig) -> Self {
        Self {
            url: config.url.clone(),
            auth_token: config.auth_token.clone(),
            ack_timeout: config.ack_timeout,
        }
    }

    async fn handshake(&self) -> Result<(WsSink, WsSource), SubscriptionError> {
        let mut request = self.url.as_str().into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(GRAPHQL_TRANSPORT_WS),
        );

        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut sink, mut source) = stream.split();

        let init = ClientFrame::ConnectionInit {
            payload: self
                .auth_token
                .as_ref()
                .map(|token| serde_json::json!({ "authToken": token })),
        };
        sink.send(init.message()?).await?;

        while let Some(message) = source.next().await {
            match decode(message?)? {
                Some(ServerFrame::ConnectionAck) => return Ok((sink, source)),
                Some(ServerFrame::Ping) => sink.send(ClientFrame::Pong.message()?).await?,
                Some(other) => {
                    return Err(SubscriptionError::Protocol(format!(
                        "expected connection_ack, got {other:?}"
                    )))
                }
                None => {}
            }
        }

        Err(SubscriptionError::Connection(
            "closed before connection_ack".to_string(),
        ))
    }
}

#[async_trait]
impl SubscriptionTransport for GraphqlWsTransport {
    async fn open(&self, request: &SubscriptionRequest) -> Result<EventStream, SubscriptionError> {
        let (mut sink, source) = tokio::time::timeout(self.ack_timeout, self.handshake())
            .await
            .map_err(|_| SubscriptionError::Timeout(self.ack_timeout))??;

        let id = Uuid::new_v4().to_string();
        let subscribe = ClientFrame::Subscribe {
            id: &id,
            payload: SubscribePayload {
                query: &request.query,
                variables: &request.variables,
            },
        };
        sink.send(subscribe.message()?).await?;
        debug!(topic = %request.topic, id = %id, "subscription opened");

        let (events, receiver) = mpsc::unbounded_channel();
        tokio::spawn(bridge(sink, source, events, id));
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }
}

/// Decodes one socket message. Frames that do not parse are logged and
/// skipped; only a close ends the exchange.
fn decode(message: Message) -> Result<Option<ServerFrame>, SubscriptionError> {
    match message {
        Message::Text(text) => match serde_json::from_str(text.as_str()) {
            Ok(frame) => Ok(Some(frame)),
            Err(err) => {
                warn!(error = %err, frame = %text.as_str(), "dropping malformed frame");
                Ok(None)
            }
        },
        Message::Close(frame) => Err(SubscriptionError::Connection(format!(
            "closed by server: {}",
            frame.map_or_else(String::new, |f| f.reason.as_str().to_owned())
        ))),
        _ => Ok(None),
    }
}

async fn bridge(
    mut sink: WsSink,
    mut source: WsSource,
    events: mpsc::UnboundedSender<Result<ChannelEvent, SubscriptionError>>,
    id: String,
) {
    loop {
        let message = tokio::select! {
            _ = events.closed() => {
                trace!(id = %id, "subscriber gone; completing");
                if let Ok(frame) = (ClientFrame::Complete { id: &id }).message() {
                    let _ = sink.send(frame).await;
                }
                break;
            }
            message = source.next() => message,
        };

        let Some(message) = message else {
            let _ = events.send(Err(SubscriptionError::Connection(
                "socket closed".to_string(),
            )));
            break;
        };

        let frame = match message.map_err(SubscriptionError::from).and_then(decode) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(err) => {
                let _ = events.send(Err(err));
                break;
            }
        };

        match frame {
            ServerFrame::Next { id: frame_id, payload } if frame_id == id => {
                let event = ChannelEvent::from_execution_result(payload);
                let failed = event.is_err();
                if events.send(event).is_err() || failed {
                    break;
                }
            }
            ServerFrame::Error { id: frame_id, payload } if frame_id == id => {
                let _ = events.send(Err(SubscriptionError::Server(payload.to_string())));
                break;
            }
            ServerFrame::Complete { id: frame_id } if frame_id == id => {
                debug!(id = %id, "subscription completed by server");
                break;
            }
            ServerFrame::Ping => {
                if let Ok(pong) = ClientFrame::Pong.message() {
                    let _ = sink.send(pong).await;
                }
            }
            other => warn!(id = %id, frame = ?other, "ignoring unexpected frame"),
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}

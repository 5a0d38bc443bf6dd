//! Transport seam between the socket client and the network.
//!
//! A [`Connector`] performs the opening handshake and hands back a
//! [`TransportLink`]: a command sender for outbound frames and an event
//! receiver for inbound frames and close notifications. The socket client
//! only ever talks to these channels.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use crate::error::ClientError;

/// Close status reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code, if the peer sent one.
    pub code: Option<u16>,
    /// Close reason.
    pub reason: String,
}

impl CloseInfo {
    /// Normal closure code.
    pub const NORMAL_CLOSURE: u16 = 1000;

    /// Returns true if the peer closed normally.
    #[must_use]
    pub fn is_normal(&self) -> bool {
        self.code == Some(Self::NORMAL_CLOSURE)
    }

    /// Close initiated locally by `disconnect()`.
    #[must_use]
    pub fn manual() -> Self {
        Self {
            code: Some(Self::NORMAL_CLOSURE),
            reason: "client disconnect".to_string(),
        }
    }

    /// Connection lost without a close frame.
    #[must_use]
    pub fn abnormal() -> Self {
        Self {
            code: None,
            reason: "connection lost".to_string(),
        }
    }
}

/// Inbound transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame.
    Frame(String),
    /// The connection closed. Always the last event.
    Closed(CloseInfo),
    /// A transport error; a `Closed` event follows.
    Error(String),
}

/// Outbound transport command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    /// Send a text frame.
    Send(String),
    /// Close the connection.
    Close,
}

/// Channels for one open connection.
#[derive(Debug)]
pub struct TransportLink {
    /// Outbound commands.
    pub outbound: mpsc::UnboundedSender<TransportCommand>,
    /// Inbound events.
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens connections to the gateway.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Performs the opening handshake.
    async fn connect(&self, url: &str) -> Result<TransportLink, ClientError>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink, ClientError> {
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut source) = stream.split();

        let (outbound, mut commands) = mpsc::unbounded_channel::<TransportCommand>();
        let (events, inbound) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                match command {
                    TransportCommand::Send(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            debug!(error = %e, "websocket write failed");
                            break;
                        }
                    }
                    TransportCommand::Close => break,
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(result) = source.next().await {
                let event = match result {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text.as_str().to_owned()),
                    Ok(Message::Binary(bytes)) => {
                        TransportEvent::Frame(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    Ok(Message::Close(frame)) => {
                        let info = frame.map_or_else(CloseInfo::default, |f| CloseInfo {
                            code: Some(u16::from(f.code)),
                            reason: f.reason.as_str().to_owned(),
                        });
                        let _ = events.send(TransportEvent::Closed(info));
                        return;
                    }
                    Ok(other) => {
                        trace!(frame = ?other, "control frame");
                        continue;
                    }
                    Err(e) => {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            let _ = events.send(TransportEvent::Closed(CloseInfo::abnormal()));
        });

        Ok(TransportLink { outbound, inbound })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory gateway for driving a socket client from tests.

    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::{mpsc, oneshot};

    use super::{CloseInfo, Connector, TransportCommand, TransportEvent, TransportLink};
    use crate::error::ClientError;

    pub(crate) struct MockConnector {
        requests: mpsc::UnboundedSender<PendingConnection>,
    }

    pub(crate) struct MockGateway {
        requests: mpsc::UnboundedReceiver<PendingConnection>,
    }

    pub(crate) struct PendingConnection {
        pub url: String,
        reply: oneshot::Sender<Result<TransportLink, ClientError>>,
    }

    pub(crate) struct MockPeer {
        sent: mpsc::UnboundedReceiver<TransportCommand>,
        events: mpsc::UnboundedSender<TransportEvent>,
    }

    pub(crate) fn mock_pair() -> (Arc<MockConnector>, MockGateway) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(MockConnector { requests: tx }),
            MockGateway { requests: rx },
        )
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, url: &str) -> Result<TransportLink, ClientError> {
            let (reply, response) = oneshot::channel();
            self.requests
                .send(PendingConnection {
                    url: url.to_string(),
                    reply,
                })
                .map_err(|_| ClientError::Connection("gateway gone".to_string()))?;
            response
                .await
                .map_err(|_| ClientError::Connection("request dropped".to_string()))?
        }
    }

    impl MockGateway {
        pub(crate) async fn next_connection(&mut self) -> PendingConnection {
            self.requests.recv().await.expect("connector dropped")
        }

        pub(crate) fn try_next(&mut self) -> Option<PendingConnection> {
            self.requests.try_recv().ok()
        }
    }

    impl PendingConnection {
        pub(crate) fn accept(self) -> MockPeer {
            let (outbound, sent) = mpsc::unbounded_channel();
            let (events, inbound) = mpsc::unbounded_channel();
            let _ = self.reply.send(Ok(TransportLink { outbound, inbound }));
            MockPeer { sent, events }
        }

        pub(crate) fn reject(self, err: ClientError) {
            let _ = self.reply.send(Err(err));
        }
    }

    impl MockPeer {
        pub(crate) fn push_frame(&self, text: &str) {
            let _ = self.events.send(TransportEvent::Frame(text.to_string()));
        }

        pub(crate) fn push_json(&self, value: Value) {
            self.push_frame(&value.to_string());
        }

        pub(crate) fn push_error(&self, message: &str) {
            let _ = self.events.send(TransportEvent::Error(message.to_string()));
        }

        pub(crate) fn close(&self, code: Option<u16>) {
            let _ = self.events.send(TransportEvent::Closed(CloseInfo {
                code,
                reason: String::new(),
            }));
        }

        pub(crate) async fn next_sent(&mut self) -> Option<TransportCommand> {
            self.sent.recv().await
        }

        pub(crate) fn drain_sent(&mut self) -> Vec<TransportCommand> {
            let mut out = Vec::new();
            while let Ok(command) = self.sent.try_recv() {
                out.push(command);
            }
            out
        }

        /// Decoded payloads of every frame sent so far.
        pub(crate) fn sent_json(&mut self) -> Vec<Value> {
            self.drain_sent()
                .into_iter()
                .filter_map(|command| match command {
                    TransportCommand::Send(text) => serde_json::from_str(&text).ok(),
                    TransportCommand::Close => None,
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_info() {
        assert!(CloseInfo::manual().is_normal());
        assert!(!CloseInfo::abnormal().is_normal());
        assert!(!CloseInfo {
            code: Some(1006),
            reason: String::new()
        }
        .is_normal());
    }

    #[tokio::test]
    async fn test_connector_rejects_unreachable_gateway() {
        let result = TungsteniteConnector.connect("ws://127.0.0.1:1/ws").await;
        assert!(matches!(result, Err(ClientError::Connection(_))));
    }
}

//! Gateway message types.
//!
//! Every frame on the gateway socket is a JSON envelope of the form
//! `{action, data?, userId?, sessionId?}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ClientError;

/// Well-known action names.
pub mod actions {
    /// Announces the client identity after the socket opens.
    pub const CONNECT: &str = "connect";
    /// Heartbeat request.
    pub const PING: &str = "ping";
    /// Heartbeat response.
    pub const PONG: &str = "pong";
    /// Gateway confirmation carrying the connection id.
    pub const CONNECTION_ESTABLISHED: &str = "connection_established";
    /// Base64 audio chunk.
    pub const VOICE_MESSAGE: &str = "voice_message";
    /// Plain text message.
    pub const TEXT_MESSAGE: &str = "text_message";
    /// Opens a voice session.
    pub const START_VOICE_SESSION: &str = "start_voice_session";
    /// Closes a voice session.
    pub const END_VOICE_SESSION: &str = "end_voice_session";
}

/// Client-to-gateway message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Action name.
    pub action: String,
    /// Action payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Sender user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Sender session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl OutboundMessage {
    /// Creates a message with no payload.
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            data: None,
            user_id: None,
            session_id: None,
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Sets the user id.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the session id.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Replaces the identity fields, discarding whatever the caller set.
    #[must_use]
    pub fn enriched(mut self, user_id: Option<String>, session_id: Option<String>) -> Self {
        self.user_id = user_id;
        self.session_id = session_id;
        self
    }

    /// Heartbeat ping stamped with the current time in milliseconds.
    #[must_use]
    pub fn ping() -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis();
        Self::new(actions::PING).with_data(serde_json::json!({ "timestamp": timestamp }))
    }

    /// Serializes the message to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ClientError> {
        serde_json::to_string(self).map_err(|e| ClientError::Serialization(e.to_string()))
    }
}

/// Gateway-to-client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Action name.
    pub action: String,
    /// Action payload.
    #[serde(default)]
    pub data: Option<Value>,
    /// User id echoed by the gateway.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Session id echoed by the gateway.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl InboundMessage {
    /// Creates a message with no payload.
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            data: None,
            user_id: None,
            session_id: None,
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Decodes a frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MalformedMessage`] if the frame is not a valid envelope.
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        serde_json::from_str(text).map_err(|e| ClientError::MalformedMessage(e.to_string()))
    }

    /// Returns a string field of the payload.
    #[must_use]
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.as_ref()?.get(key)?.as_str()
    }

    /// Returns the payload as an object.
    #[must_use]
    pub fn data_object(&self) -> Option<&Map<String, Value>> {
        self.data.as_ref()?.as_object()
    }

    /// Returns the gateway-assigned connection id carried by `connection_established`.
    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        self.data_str("connectionId")
    }

    /// Returns true for heartbeat responses.
    #[must_use]
    pub fn is_pong(&self) -> bool {
        self.action == actions::PONG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_serialize_skips_empty_fields() {
        let msg = OutboundMessage::new(actions::START_VOICE_SESSION);
        let json = msg.to_json().expect("serialize");
        assert_eq!(json, r#"{"action":"start_voice_session"}"#);
    }

    #[test]
    fn test_outbound_serialize_camel_case() {
        let msg = OutboundMessage::new(actions::TEXT_MESSAGE)
            .with_data(serde_json::json!({ "text": "hi" }))
            .with_user_id("u1")
            .with_session_id("s1");
        let json = msg.to_json().expect("serialize");
        assert!(json.contains("\"userId\":\"u1\""));
        assert!(json.contains("\"sessionId\":\"s1\""));
        assert!(json.contains("\"text\":\"hi\""));
    }

    #[test]
    fn test_outbound_enriched_overwrites_identity() {
        let msg = OutboundMessage::new("foo")
            .with_user_id("spoofed")
            .with_session_id("spoofed-session")
            .enriched(Some("real".to_string()), None);
        assert_eq!(msg.user_id, Some("real".to_string()));
        assert!(msg.session_id.is_none());
    }

    #[test]
    fn test_outbound_ping_has_timestamp() {
        let msg = OutboundMessage::ping();
        assert_eq!(msg.action, actions::PING);
        let timestamp = msg
            .data
            .as_ref()
            .and_then(|d| d.get("timestamp"))
            .and_then(Value::as_i64);
        assert!(timestamp.is_some());
    }

    #[test]
    fn test_inbound_parse_connection_established() {
        let json = r#"{"action":"connection_established","data":{"connectionId":"conn-123"}}"#;
        let msg = InboundMessage::parse(json).expect("parse");
        assert_eq!(msg.action, actions::CONNECTION_ESTABLISHED);
        assert_eq!(msg.connection_id(), Some("conn-123"));
    }

    #[test]
    fn test_inbound_parse_without_data() {
        let msg = InboundMessage::parse(r#"{"action":"pong"}"#).expect("parse");
        assert!(msg.is_pong());
        assert!(msg.data.is_none());
        assert!(msg.data_object().is_none());
    }

    #[test]
    fn test_inbound_parse_malformed() {
        let err = InboundMessage::parse("{not json").expect_err("malformed");
        assert!(matches!(err, ClientError::MalformedMessage(_)));

        let err = InboundMessage::parse(r#"{"data":{}}"#).expect_err("missing action");
        assert!(matches!(err, ClientError::MalformedMessage(_)));
    }
}

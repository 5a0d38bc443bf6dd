//! Well-known subscription topics.
//!
//! Four standing topics are scoped to a user; the voice topic is scoped to
//! one voice session.

use std::fmt;

use serde_json::{json, Value};

/// Subscription topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// General user events.
    General,
    /// Chat events.
    Chat,
    /// UI-control events.
    UiControl,
    /// Notes events.
    Notes,
    /// Events for one voice session.
    VoiceSession,
}

impl Topic {
    /// Topics opened for every signed-in user.
    pub const STANDING: [Topic; 4] = [Self::General, Self::Chat, Self::UiControl, Self::Notes];

    /// Parses a topic name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "general" => Some(Self::General),
            "chat" => Some(Self::Chat),
            "ui_control" => Some(Self::UiControl),
            "notes" => Some(Self::Notes),
            "voice_session" => Some(Self::VoiceSession),
            _ => None,
        }
    }

    /// Returns the topic name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Chat => "chat",
            Self::UiControl => "ui_control",
            Self::Notes => "notes",
            Self::VoiceSession => "voice_session",
        }
    }

    /// Returns the subscription document for this topic.
    #[must_use]
    pub const fn query(&self) -> &'static str {
        match self {
            Self::General => {
                "subscription OnGeneralEvent($userId: String!) { \
                 onGeneralEvent(userId: $userId) { status action data content timestamp } }"
            }
            Self::Chat => {
                "subscription OnChatEvent($userId: String!) { \
                 onChatEvent(userId: $userId) { status action data content timestamp } }"
            }
            Self::UiControl => {
                "subscription OnUiControlEvent($userId: String!) { \
                 onUiControlEvent(userId: $userId) { status action data content timestamp } }"
            }
            Self::Notes => {
                "subscription OnNotesEvent($userId: String!) { \
                 onNotesEvent(userId: $userId) { status action data content timestamp } }"
            }
            Self::VoiceSession => {
                "subscription OnVoiceSessionEvent($sessionId: String!) { \
                 onVoiceSessionEvent(sessionId: $sessionId) { status action data content timestamp } }"
            }
        }
    }

    /// Returns true for the session-scoped topic.
    #[must_use]
    pub const fn is_session_scoped(&self) -> bool {
        matches!(self, Self::VoiceSession)
    }

    /// Builds the variables for this topic: `{userId}` or `{sessionId}`.
    #[must_use]
    pub fn variables(&self, scope_id: &str) -> Value {
        if self.is_session_scoped() {
            json!({ "sessionId": scope_id })
        } else {
            json!({ "userId": scope_id })
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_names() {
        for topic in [
            Topic::General,
            Topic::Chat,
            Topic::UiControl,
            Topic::Notes,
            Topic::VoiceSession,
        ] {
            assert_eq!(Topic::parse(topic.name()), Some(topic));
        }
        assert_eq!(Topic::parse("unknown"), None);
    }

    #[test]
    fn test_variables_scope() {
        assert_eq!(Topic::Chat.variables("u1"), json!({ "userId": "u1" }));
        assert_eq!(
            Topic::VoiceSession.variables("s1"),
            json!({ "sessionId": "s1" })
        );
    }

    #[test]
    fn test_queries_reference_their_variable() {
        for topic in Topic::STANDING {
            assert!(topic.query().contains("$userId"));
        }
        assert!(Topic::VoiceSession.query().contains("$sessionId"));
    }
}

//! Room messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::SKIP_MESSAGE_TEXT;
use crate::ids::{AgentId, MessageId, RoomId};

/// Conversation role of a stored message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human (or externally injected) input.
    User,
    /// Agent output.
    Assistant,
}

/// Who authored a user-role message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantType {
    /// The human user of the room.
    #[default]
    User,
    /// A human speaking as a named character.
    Character,
    /// Narration that sets the scene.
    SituationBuilder,
    /// System notices.
    System,
}

/// A persisted message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message id.
    pub id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Role.
    pub role: Role,
    /// Authoring agent for assistant messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    /// Display name of the author at the time of writing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// Message body.
    pub content: String,
    /// Model thinking attached to an assistant reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Author kind for user-role messages.
    #[serde(default)]
    pub participant_type: ParticipantType,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Whether this is a skip marker rather than real agent output.
    pub fn is_skip_marker(&self) -> bool {
        self.role == Role::Assistant && self.content == SKIP_MESSAGE_TEXT
    }

    /// Whether this message was written by `agent_id`.
    pub fn is_from(&self, agent_id: AgentId) -> bool {
        self.agent_id == Some(agent_id)
    }
}

/// A message about to be persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMessage {
    /// Role.
    pub role: Role,
    /// Authoring agent.
    pub agent_id: Option<AgentId>,
    /// Author display name.
    pub speaker: Option<String>,
    /// Body.
    pub content: String,
    /// Thinking text.
    pub thinking: Option<String>,
    /// Author kind.
    pub participant_type: ParticipantType,
}

impl NewMessage {
    /// A human message.
    pub fn user(content: impl Into<String>, participant_type: ParticipantType, speaker: Option<String>) -> Self {
        Self {
            role: Role::User,
            agent_id: None,
            speaker,
            content: content.into(),
            thinking: None,
            participant_type,
        }
    }

    /// An agent reply.
    pub fn assistant(agent_id: AgentId, speaker: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            agent_id: Some(agent_id),
            speaker: Some(speaker.into()),
            content: content.into(),
            thinking: None,
            participant_type: ParticipantType::User,
        }
    }

    /// Attach thinking text; empty text is dropped.
    #[must_use]
    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        let thinking = thinking.into();
        self.thinking = (!thinking.is_empty()).then_some(thinking);
        self
    }

    /// The persistent marker left when an agent skips after its stream started.
    pub fn skip(agent_id: AgentId, speaker: impl Into<String>) -> Self {
        Self::assistant(agent_id, speaker, SKIP_MESSAGE_TEXT)
    }

    /// Whether this is a skip marker. Skip markers do not count as room activity.
    pub fn is_skip_marker(&self) -> bool {
        self.role == Role::Assistant && self.content == SKIP_MESSAGE_TEXT
    }
}

/// A human message handed to the orchestrator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    /// Body.
    pub content: String,
    /// Author kind.
    #[serde(default)]
    pub participant_type: ParticipantType,
    /// Character or narrator name, when not the plain user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_name: Option<String>,
    /// Agents addressed with @-mentions; empty addresses everyone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentioned_agent_ids: Vec<AgentId>,
    /// Set when the caller already persisted the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_message_id: Option<MessageId>,
}

impl IncomingMessage {
    /// Plain user message.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Address specific agents.
    #[must_use]
    pub fn mentioning(mut self, agents: impl IntoIterator<Item = AgentId>) -> Self {
        self.mentioned_agent_ids = agents.into_iter().collect();
        self
    }

    /// Mark as already persisted.
    #[must_use]
    pub fn saved_as(mut self, id: MessageId) -> Self {
        self.saved_message_id = Some(id);
        self
    }

    /// Convert to the row the orchestrator persists.
    pub fn to_new_message(&self) -> NewMessage {
        NewMessage::user(
            self.content.clone(),
            self.participant_type,
            self.participant_name.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(new: NewMessage) -> Message {
        Message {
            id: MessageId::new(1),
            room_id: RoomId::new(1),
            role: new.role,
            agent_id: new.agent_id,
            speaker: new.speaker,
            content: new.content,
            thinking: new.thinking,
            participant_type: new.participant_type,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn skip_marker_detected() {
        let msg = stored(NewMessage::skip(AgentId::new(3), "Ada"));
        assert!(msg.is_skip_marker());
        assert!(NewMessage::skip(AgentId::new(3), "Ada").is_skip_marker());
        assert!(msg.is_from(AgentId::new(3)));
    }

    #[test]
    fn user_message_with_skip_text_is_not_marker() {
        let msg = stored(NewMessage::user(SKIP_MESSAGE_TEXT, ParticipantType::User, None));
        assert!(!msg.is_skip_marker());
    }

    #[test]
    fn empty_thinking_dropped() {
        let msg = NewMessage::assistant(AgentId::new(1), "Ada", "hi").with_thinking("");
        assert!(msg.thinking.is_none());
        let msg = msg.with_thinking("hmm");
        assert_eq!(msg.thinking.as_deref(), Some("hmm"));
    }

    #[test]
    fn incoming_parses_camel_case() {
        let json = r#"{"content":"hi","participantType":"situation_builder","mentionedAgentIds":[2,3]}"#;
        let msg: IncomingMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.participant_type, ParticipantType::SituationBuilder);
        assert_eq!(msg.mentioned_agent_ids, vec![AgentId::new(2), AgentId::new(3)]);
        assert!(msg.saved_message_id.is_none());
    }

    #[test]
    fn incoming_converts_to_user_row() {
        let row = IncomingMessage::text("hello").to_new_message();
        assert_eq!(row.role, Role::User);
        assert!(row.agent_id.is_none());
        assert_eq!(row.content, "hello");
    }
}

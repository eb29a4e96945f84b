//! Transcript prompt assembly.

use std::borrow::Cow;
use std::collections::HashSet;

use parlor_core::constants::SITUATION_BUILDER_LABEL;
use parlor_core::{Agent, AgentId, Message, ParticipantType, Role};
use parlor_settings::ConversationSettings;

/// Turns room history into the prompt for one agent turn.
#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder<'a> {
    settings: &'a ConversationSettings,
}

impl<'a> PromptBuilder<'a> {
    /// Builder using `settings` templates.
    pub fn new(settings: &'a ConversationSettings) -> Self {
        Self { settings }
    }

    /// Messages `agent_id` has not reacted to yet: everything after its own
    /// latest message, or the last `context_limit` messages if it never spoke.
    pub fn unseen<'m>(&self, messages: &'m [Message], agent_id: AgentId) -> &'m [Message] {
        match messages.iter().rposition(|m| m.is_from(agent_id)) {
            Some(last) => &messages[last + 1..],
            None => &messages[messages.len().saturating_sub(self.settings.context_limit)..],
        }
    }

    /// Full prompt for `agent`, or `None` when nothing new is visible to it.
    ///
    /// Skip markers and system notices are hidden, and repeated
    /// `(speaker, content)` pairs are shown once.
    pub fn build(&self, messages: &[Message], agent: &Agent, participant_count: usize) -> Option<String> {
        let mut seen: HashSet<(Cow<'_, str>, &str)> = HashSet::new();
        let mut lines = vec![self.settings.header.clone()];

        for message in self.unseen(messages, agent.id) {
            if message.is_skip_marker() || message.participant_type == ParticipantType::System {
                continue;
            }
            let speaker = self.speaker(message);
            let line = format!("{speaker}: {}\n", message.content);
            if seen.insert((speaker, message.content.as_str())) {
                lines.push(line);
            }
        }
        if lines.len() == 1 {
            return None;
        }

        if !self.settings.footer.is_empty() {
            lines.push(self.settings.footer.clone());
        }
        let instruction = self.instruction(&agent.name, participant_count);
        if !instruction.is_empty() {
            lines.push(instruction);
        }
        Some(lines.join("\n"))
    }

    /// Prompt used when an agent must speak but has no transcript.
    pub fn fallback(&self) -> &str {
        &self.settings.fallback_prompt
    }

    fn instruction(&self, agent_name: &str, participant_count: usize) -> String {
        let template = if participant_count > 1 {
            &self.settings.multi_agent_instruction
        } else {
            &self.settings.single_agent_instruction
        };
        template
            .replace("{agent_name}", agent_name)
            .replace("{user_name}", &self.settings.user_name)
    }

    fn speaker<'m>(&'m self, message: &'m Message) -> Cow<'m, str> {
        match (message.role, message.participant_type, message.speaker.as_deref()) {
            (Role::User, ParticipantType::Character, Some(name)) => Cow::Borrowed(name),
            (Role::User, ParticipantType::SituationBuilder, _) => Cow::Borrowed(SITUATION_BUILDER_LABEL),
            (Role::User, ..) => Cow::Borrowed(self.settings.user_name.as_str()),
            (Role::Assistant, _, Some(name)) => Cow::Borrowed(name),
            (Role::Assistant, _, None) => match message.agent_id {
                Some(id) => Cow::Owned(format!("Agent {}", id.get())),
                None => Cow::Borrowed("Unknown"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use parlor_core::constants::SKIP_MESSAGE_TEXT;
    use parlor_core::{MessageId, RoomId};

    use super::*;

    fn msg(id: i64, role: Role, agent: Option<i64>, speaker: Option<&str>, content: &str) -> Message {
        Message {
            id: MessageId::new(id),
            room_id: RoomId::new(1),
            role,
            agent_id: agent.map(AgentId::new),
            speaker: speaker.map(str::to_string),
            content: content.to_string(),
            thinking: None,
            participant_type: ParticipantType::User,
            timestamp: Utc::now(),
        }
    }

    fn user(id: i64, content: &str) -> Message {
        msg(id, Role::User, None, None, content)
    }

    fn reply(id: i64, agent: i64, name: &str, content: &str) -> Message {
        msg(id, Role::Assistant, Some(agent), Some(name), content)
    }

    #[test]
    fn formats_transcript_and_multi_agent_instruction() {
        let settings = ConversationSettings::default();
        let builder = PromptBuilder::new(&settings);
        let history = vec![user(1, "hello"), reply(2, 2, "Bo", "hey")];

        let prompt = builder.build(&history, &Agent::new(1, "Ada"), 3).unwrap();

        assert_eq!(
            prompt,
            "Here's the conversation so far:\nUser: hello\n\nBo: hey\n\n\
             Reply as Ada. Others may answer too; skip this turn if you have nothing to add."
        );
    }

    #[test]
    fn single_agent_instruction_names_the_user() {
        let settings = ConversationSettings {
            user_name: "Sam".into(),
            ..ConversationSettings::default()
        };
        let prompt = PromptBuilder::new(&settings)
            .build(&[user(1, "hi")], &Agent::new(1, "Ada"), 1)
            .unwrap();
        assert!(prompt.starts_with("Here's the conversation so far:\nSam: hi\n"));
        assert!(prompt.ends_with("Reply to Sam as Ada."));
    }

    #[test]
    fn only_messages_after_own_last_reply() {
        let settings = ConversationSettings::default();
        let builder = PromptBuilder::new(&settings);
        let history = vec![
            user(1, "first"),
            reply(2, 1, "Ada", "mine"),
            reply(3, 2, "Bo", "after"),
        ];

        let unseen = builder.unseen(&history, AgentId::new(1));
        assert_eq!(unseen.len(), 1);
        assert_eq!(unseen[0].content, "after");
    }

    #[test]
    fn nothing_new_after_own_reply() {
        let settings = ConversationSettings::default();
        let builder = PromptBuilder::new(&settings);
        let history = vec![user(1, "hi"), reply(2, 1, "Ada", "hello")];
        assert!(builder.build(&history, &Agent::new(1, "Ada"), 2).is_none());
    }

    #[test]
    fn newcomer_sees_last_context_limit_messages() {
        let settings = ConversationSettings {
            context_limit: 2,
            ..ConversationSettings::default()
        };
        let builder = PromptBuilder::new(&settings);
        let history: Vec<Message> = (1..=5).map(|i| user(i, &format!("m{i}"))).collect();

        let unseen = builder.unseen(&history, AgentId::new(9));
        let contents: Vec<_> = unseen.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m5"]);
    }

    #[test]
    fn hides_skips_and_system_and_dedupes() {
        let settings = ConversationSettings::default();
        let builder = PromptBuilder::new(&settings);
        let mut notice = user(3, "Bo joined");
        notice.participant_type = ParticipantType::System;
        let history = vec![
            user(1, "same"),
            user(2, "same"),
            notice,
            reply(4, 2, "Bo", SKIP_MESSAGE_TEXT),
        ];

        let prompt = builder.build(&history, &Agent::new(1, "Ada"), 2).unwrap();

        assert_eq!(prompt.matches("User: same").count(), 1);
        assert!(!prompt.contains("joined"));
        assert!(!prompt.contains(SKIP_MESSAGE_TEXT));
    }

    #[test]
    fn only_hidden_messages_means_nothing_new() {
        let settings = ConversationSettings::default();
        let history = vec![reply(1, 2, "Bo", SKIP_MESSAGE_TEXT)];
        assert!(PromptBuilder::new(&settings)
            .build(&history, &Agent::new(1, "Ada"), 2)
            .is_none());
    }

    #[test]
    fn speaker_labels() {
        let settings = ConversationSettings::default();
        let builder = PromptBuilder::new(&settings);

        let mut character = msg(1, Role::User, None, Some("Knight"), "halt");
        character.participant_type = ParticipantType::Character;
        let mut scene = msg(2, Role::User, None, Some("ignored"), "rain falls");
        scene.participant_type = ParticipantType::SituationBuilder;
        let anonymous = msg(3, Role::Assistant, Some(7), None, "beep");

        let prompt = builder
            .build(&[character, scene, anonymous], &Agent::new(1, "Ada"), 2)
            .unwrap();

        assert!(prompt.contains("Knight: halt\n"));
        assert!(prompt.contains("Situation Builder: rain falls\n"));
        assert!(prompt.contains("Agent 7: beep\n"));
    }

    #[test]
    fn footer_is_included_when_set() {
        let settings = ConversationSettings {
            footer: "</transcript>".into(),
            ..ConversationSettings::default()
        };
        let prompt = PromptBuilder::new(&settings)
            .build(&[user(1, "hi")], &Agent::new(1, "Ada"), 2)
            .unwrap();
        assert!(prompt.contains("User: hi\n\n</transcript>\nReply as Ada."));
    }
}

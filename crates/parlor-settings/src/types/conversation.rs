//! Prompt assembly.

use serde::{Deserialize, Serialize};

/// Templates and limits used when building an agent's prompt from room history.
///
/// Instructions may contain `{agent_name}` and `{user_name}` placeholders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationSettings {
    /// Speaker label for plain user messages.
    pub user_name: String,
    /// Messages shown to an agent that has not spoken yet.
    pub context_limit: usize,
    /// Messages fetched from the store per prompt.
    pub history_limit: usize,
    /// First line of the transcript block.
    pub header: String,
    /// Closing line of the transcript block; omitted when empty.
    pub footer: String,
    /// Instruction appended when several agents share the room.
    pub multi_agent_instruction: String,
    /// Instruction appended when the agent is alone with the user.
    pub single_agent_instruction: String,
    /// Prompt used when there is no transcript to show.
    pub fallback_prompt: String,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            user_name: "User".to_string(),
            context_limit: 25,
            history_limit: 120,
            header: "Here's the conversation so far:".to_string(),
            footer: String::new(),
            multi_agent_instruction: "Reply as {agent_name}. Others may answer too; \
                                      skip this turn if you have nothing to add."
                .to_string(),
            single_agent_instruction: "Reply to {user_name} as {agent_name}.".to_string(),
            fallback_prompt: "Continue the conversation naturally.".to_string(),
        }
    }
}

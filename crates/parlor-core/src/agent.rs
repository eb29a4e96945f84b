//! Agent participants.

use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

/// An autonomous participant, read by value from the persistence layer.
///
/// The scheduler never mutates agents; the three scheduling attributes
/// (`priority`, `interrupt_every_turn`, `transparent`) plus `is_critic` decide
/// where an agent lands on a turn tape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Agent id.
    pub id: AgentId,
    /// Display name, also used as the speaker label in prompts.
    pub name: String,
    /// Optional group the agent was configured under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Final system prompt handed to the backend session.
    #[serde(default)]
    pub system_prompt: String,
    /// Higher responds earlier; anything above zero makes a priority agent.
    #[serde(default)]
    pub priority: i32,
    /// Gets an extra turn after every non-transparent agent message.
    #[serde(default)]
    pub interrupt_every_turn: bool,
    /// Messages from this agent never trigger interrupt agents.
    #[serde(default)]
    pub transparent: bool,
    /// Observes the room and writes feedback outside the visible history.
    #[serde(default)]
    pub is_critic: bool,
}

impl Agent {
    /// Plain regular agent with no scheduling attributes.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(id),
            name: name.into(),
            group: None,
            system_prompt: String::new(),
            priority: 0,
            interrupt_every_turn: false,
            transparent: false,
            is_critic: false,
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Mark as an interrupt agent.
    #[must_use]
    pub fn interrupting(mut self) -> Self {
        self.interrupt_every_turn = true;
        self
    }

    /// Mark as transparent.
    #[must_use]
    pub fn transparent(mut self) -> Self {
        self.transparent = true;
        self
    }

    /// Mark as a critic.
    #[must_use]
    pub fn critic(mut self) -> Self {
        self.is_critic = true;
        self
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Whether this agent belongs in the priority group.
    ///
    /// Interrupt status wins over priority: an agent that is both is scheduled
    /// only through interrupt cells.
    pub fn is_priority(&self) -> bool {
        self.priority > 0 && !self.interrupt_every_turn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_flags() {
        let a = Agent::new(1, "Ada").with_priority(3).transparent();
        assert_eq!(a.id, AgentId::new(1));
        assert_eq!(a.priority, 3);
        assert!(a.transparent);
        assert!(!a.interrupt_every_turn);
        assert!(a.is_priority());
    }

    #[test]
    fn interrupt_takes_precedence_over_priority() {
        let a = Agent::new(2, "Bo").with_priority(5).interrupting();
        assert!(!a.is_priority());
    }

    #[test]
    fn deserializes_with_defaults() {
        let a: Agent = serde_json::from_str(r#"{"id": 4, "name": "Cy"}"#).unwrap();
        assert_eq!(a.priority, 0);
        assert!(!a.is_critic);
        assert!(a.system_prompt.is_empty());
    }
}

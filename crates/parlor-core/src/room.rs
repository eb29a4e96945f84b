//! Chat rooms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, RoomId};

/// A shared room, read by value from the persistence layer.
///
/// Mutated externally between scheduler checkpoints; the scheduler re-reads it
/// before every tape cell instead of caching it across a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Room id.
    pub id: RoomId,
    /// Display name.
    pub name: String,
    /// Freezes all scheduling while set.
    #[serde(default)]
    pub is_paused: bool,
    /// Set when a round ended with every agent skipping; cleared by a human message.
    #[serde(default)]
    pub is_finished: bool,
    /// Cap on total (non-skip) assistant messages; `None` is unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_interactions: Option<u32>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last human or agent message time.
    pub last_activity_at: DateTime<Utc>,
    /// Member agents, critics included.
    #[serde(default)]
    pub agent_ids: Vec<AgentId>,
}

impl Room {
    /// Fresh, unpaused room with no members.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: RoomId::new(id),
            name: name.into(),
            is_paused: false,
            is_finished: false,
            max_interactions: None,
            created_at: now,
            last_activity_at: now,
            agent_ids: Vec::new(),
        }
    }

    /// Set the interaction cap.
    #[must_use]
    pub fn with_max_interactions(mut self, max: u32) -> Self {
        self.max_interactions = Some(max);
        self
    }

    /// Whether `count` assistant messages exhaust the interaction cap.
    pub fn interaction_limit_reached(&self, count: u32) -> bool {
        self.max_interactions.is_some_and(|max| count >= max)
    }
}

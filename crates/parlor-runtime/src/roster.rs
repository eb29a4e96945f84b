//! Splitting a room's agents into scheduling groups.

use std::collections::{BTreeSet, HashMap};

use parlor_core::{Agent, AgentId, RoomId};
use rand::seq::SliceRandom;
use tracing::{info, warn};

/// A room's agents grouped by how they are scheduled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Roster {
    /// `priority > 0`, highest first, ties broken by id.
    pub priority: Vec<Agent>,
    /// Everyone else who speaks in normal turns.
    pub regular: Vec<Agent>,
    /// Agents that take an extra turn after every non-transparent reply.
    pub interrupt: Vec<Agent>,
    /// Observers whose output never enters the room history.
    pub critics: Vec<Agent>,
}

impl Roster {
    /// Group `agents`. Critic status wins over everything, then interrupt
    /// status wins over priority.
    pub fn from_agents(agents: impl IntoIterator<Item = Agent>) -> Self {
        let mut roster = Self::default();
        for agent in agents {
            if agent.is_critic {
                roster.critics.push(agent);
            } else if agent.interrupt_every_turn {
                roster.interrupt.push(agent);
            } else if agent.is_priority() {
                roster.priority.push(agent);
            } else {
                roster.regular.push(agent);
            }
        }
        roster
            .priority
            .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        roster
    }

    /// Shuffle the regular group in place.
    pub fn shuffle_regular(&mut self) {
        self.regular.shuffle(&mut rand::rng());
    }

    /// `true` when there is at least one interrupt agent and all of them are
    /// transparent.
    pub fn all_interrupt_transparent(&self) -> bool {
        !self.interrupt.is_empty() && self.interrupt.iter().all(|a| a.transparent)
    }

    /// Agents that take part in normal rounds (critics excluded).
    pub fn participant_count(&self) -> usize {
        self.priority.len() + self.regular.len() + self.interrupt.len()
    }

    /// Whether nobody would speak.
    pub fn is_empty(&self) -> bool {
        self.participant_count() == 0 && self.critics.is_empty()
    }

    /// Every non-critic agent keyed by id, for the tape executor.
    pub fn participants_by_id(&self) -> HashMap<AgentId, Agent> {
        self.priority
            .iter()
            .chain(&self.regular)
            .chain(&self.interrupt)
            .map(|a| (a.id, a.clone()))
            .collect()
    }
}

/// Narrow `agents` to the ones a message @-mentions.
///
/// Mentions of agents outside the room are logged and ignored. With no valid
/// mention left, everyone is kept.
pub fn filter_mentions(room_id: RoomId, agents: Vec<Agent>, mentioned: &[AgentId]) -> Vec<Agent> {
    if mentioned.is_empty() {
        return agents;
    }

    let wanted: BTreeSet<AgentId> = mentioned.iter().copied().collect();
    let present: BTreeSet<AgentId> = agents.iter().map(|a| a.id).collect();
    let invalid: Vec<AgentId> = wanted.difference(&present).copied().collect();
    if !invalid.is_empty() {
        warn!(%room_id, ?invalid, "ignoring mentions of agents not in the room");
    }
    if wanted.is_disjoint(&present) {
        return agents;
    }

    let kept: Vec<Agent> = agents.into_iter().filter(|a| wanted.contains(&a.id)).collect();
    info!(
        %room_id,
        agents = ?kept.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
        "mention filter applied"
    );
    kept
}

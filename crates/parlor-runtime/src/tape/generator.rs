//! Builds turn tapes from a roster.
//!
//! Generation is pure: the same roster and round kind always produce the same
//! tape. Whether an interrupt cell actually runs is decided later by the
//! executor, which skips cells whose triggering agent did not reply.

use parlor_core::{Agent, AgentId};

use super::model::{CellType, RoundKind, TurnCell, TurnTape};
use crate::roster::Roster;

/// Tape factory over one roster snapshot.
#[derive(Debug, Clone, Copy)]
pub struct TapeGenerator<'a> {
    roster: &'a Roster,
}

impl<'a> TapeGenerator<'a> {
    /// Generator for `roster`. Regular agents are used in the roster's current
    /// order, so shuffle before generating if variety is wanted.
    pub fn new(roster: &'a Roster) -> Self {
        Self { roster }
    }

    /// Tape for `round`.
    pub fn generate(&self, round: RoundKind) -> TurnTape {
        let cells = match round {
            RoundKind::Initial => self.initial_cells(),
            RoundKind::FollowUp { .. } => self.follow_up_cells(),
        };
        TurnTape::new(round, cells)
    }

    /// Priority agents one at a time, then all regular agents together, then
    /// an interrupt cell per possible trigger.
    pub fn generate_initial_round(&self) -> TurnTape {
        self.generate(RoundKind::Initial)
    }

    /// Every agent on its own, each followed by its interrupt cell.
    pub fn generate_follow_up_round(&self, round_num: u32) -> TurnTape {
        self.generate(RoundKind::FollowUp { round_num })
    }

    fn initial_cells(&self) -> Vec<TurnCell> {
        let mut cells: Vec<TurnCell> = self
            .roster
            .priority
            .iter()
            .map(|a| TurnCell::single(CellType::ConcurrentInitial, a.id))
            .collect();

        if !self.roster.regular.is_empty() {
            let ids = self.roster.regular.iter().map(|a| a.id).collect();
            cells.push(TurnCell::concurrent(CellType::ConcurrentInitial, ids));
        }

        cells.extend(self.speakers().filter_map(|a| self.interrupt_cell(a)));
        cells
    }

    fn follow_up_cells(&self) -> Vec<TurnCell> {
        let mut cells = Vec::new();
        for agent in self.speakers() {
            cells.push(TurnCell::single(CellType::Sequential, agent.id));
            cells.extend(self.interrupt_cell(agent));
        }
        cells
    }

    fn speakers(&self) -> impl Iterator<Item = &'a Agent> + use<'a> {
        self.roster.priority.iter().chain(&self.roster.regular)
    }

    fn interrupt_cell(&self, trigger: &Agent) -> Option<TurnCell> {
        if trigger.transparent || self.roster.interrupt.is_empty() || self.roster.all_interrupt_transparent() {
            return None;
        }
        TurnCell::interrupt(trigger.id, self.interrupt_ids())
    }

    fn interrupt_ids(&self) -> impl Iterator<Item = AgentId> + use<'a> {
        self.roster.interrupt.iter().map(|a| a.id)
    }
}

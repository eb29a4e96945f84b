//! Turn tape data types.

use std::fmt;

use parlor_core::AgentId;
use serde::{Deserialize, Serialize};

/// How a cell was scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    /// One agent of a follow-up round.
    Sequential,
    /// Initial response to a human message.
    ConcurrentInitial,
    /// Interrupt agents reacting to one agent's reply.
    Interrupt,
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sequential => "sequential",
            Self::ConcurrentInitial => "concurrent_initial",
            Self::Interrupt => "interrupt",
        };
        f.write_str(s)
    }
}

/// One step of a tape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCell {
    /// Scheduling kind.
    pub cell_type: CellType,
    /// Agents to call, in order.
    pub agent_ids: Vec<AgentId>,
    /// Fan out instead of walking `agent_ids` one at a time.
    pub is_concurrent: bool,
    /// For interrupt cells, whose reply scheduled this cell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggering_agent_id: Option<AgentId>,
}

impl TurnCell {
    /// A single agent run on its own.
    pub fn single(cell_type: CellType, agent_id: AgentId) -> Self {
        Self {
            cell_type,
            agent_ids: vec![agent_id],
            is_concurrent: false,
            triggering_agent_id: None,
        }
    }

    /// Agents run in parallel.
    pub fn concurrent(cell_type: CellType, agent_ids: Vec<AgentId>) -> Self {
        Self {
            cell_type,
            agent_ids,
            is_concurrent: true,
            triggering_agent_id: None,
        }
    }

    /// Interrupt agents answering `trigger`. The trigger itself is dropped from
    /// the list; `None` when nobody would be left.
    pub fn interrupt(trigger: AgentId, interrupt_agents: impl IntoIterator<Item = AgentId>) -> Option<Self> {
        let agent_ids: Vec<AgentId> = interrupt_agents.into_iter().filter(|&id| id != trigger).collect();
        (!agent_ids.is_empty()).then_some(Self {
            cell_type: CellType::Interrupt,
            agent_ids,
            is_concurrent: false,
            triggering_agent_id: Some(trigger),
        })
    }
}

/// Which kind of round a tape drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoundKind {
    /// Response to a fresh human message.
    Initial,
    /// Agents reacting to each other, zero-based round number.
    FollowUp {
        /// Round index within this conversation burst.
        round_num: u32,
    },
}

impl RoundKind {
    /// Whether this is the initial round.
    pub fn is_initial(self) -> bool {
        matches!(self, Self::Initial)
    }
}

/// An ordered list of cells with a cursor.
///
/// Cells are never reordered. An interrupted tape is cut at the cursor: the
/// interrupted cell stays current and everything after it is dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnTape {
    round: RoundKind,
    cells: Vec<TurnCell>,
    cursor: usize,
    cut: bool,
}

impl TurnTape {
    /// Tape positioned at its first cell.
    pub fn new(round: RoundKind, cells: Vec<TurnCell>) -> Self {
        Self {
            round,
            cells,
            cursor: 0,
            cut: false,
        }
    }

    /// Round this tape was generated for.
    pub fn round(&self) -> RoundKind {
        self.round
    }

    /// Cell under the cursor.
    pub fn current_cell(&self) -> Option<&TurnCell> {
        self.cells.get(self.cursor)
    }

    /// Move past the current cell.
    pub fn advance(&mut self) {
        if self.cursor < self.cells.len() {
            self.cursor += 1;
        }
    }

    /// Drop every cell after the current one.
    pub fn cut_at_current(&mut self) {
        self.cells.truncate(self.cursor.saturating_add(1).min(self.cells.len()));
        self.cut = true;
    }

    /// Whether [`cut_at_current`](Self::cut_at_current) was applied.
    pub fn was_cut(&self) -> bool {
        self.cut
    }

    /// No cell left under the cursor.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.cells.len()
    }

    /// Cells from the cursor onward.
    pub fn remaining(&self) -> &[TurnCell] {
        &self.cells[self.cursor.min(self.cells.len())..]
    }

    /// All cells, including ones already executed.
    pub fn cells(&self) -> &[TurnCell] {
        &self.cells
    }

    /// Cursor index.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the tape has no cells at all.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Counters and stop flags from one tape run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Replies persisted.
    pub total_responses: u32,
    /// Agents that chose not to speak.
    pub total_skips: u32,
    /// Stopped because the room was paused.
    pub was_paused: bool,
    /// Stopped on the global or per-room message cap.
    pub reached_limit: bool,
    /// Cancelled mid-cell.
    pub was_interrupted: bool,
    /// Nobody replied and at least one agent skipped.
    pub all_skipped: bool,
}

impl ExecutionResult {
    /// Whether the run ended early for any reason.
    pub fn stopped_early(&self) -> bool {
        self.was_paused || self.reached_limit || self.was_interrupted
    }

    pub(crate) fn settle(&mut self) {
        self.all_skipped = self.total_responses == 0 && self.total_skips > 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(n: i64) -> AgentId {
        AgentId::new(n)
    }

    fn tape(n: i64) -> TurnTape {
        let cells = (1..=n)
            .map(|i| TurnCell::single(CellType::Sequential, agent(i)))
            .collect();
        TurnTape::new(RoundKind::FollowUp { round_num: 0 }, cells)
    }

    #[test]
    fn advance_walks_to_exhaustion() {
        let mut t = tape(2);
        assert_eq!(t.current_cell().unwrap().agent_ids, vec![agent(1)]);
        t.advance();
        assert_eq!(t.current_cell().unwrap().agent_ids, vec![agent(2)]);
        t.advance();
        assert!(t.is_exhausted());
        assert!(t.current_cell().is_none());
        t.advance();
        assert_eq!(t.position(), 2);
    }

    #[test]
    fn cut_keeps_interrupted_cell_current() {
        let mut t = tape(4);
        t.advance();
        t.cut_at_current();

        assert!(t.was_cut());
        assert_eq!(t.position(), 1);
        assert_eq!(t.remaining().len(), 1);
        assert_eq!(t.remaining()[0].agent_ids, vec![agent(2)]);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn cut_on_exhausted_tape_keeps_everything() {
        let mut t = tape(2);
        t.advance();
        t.advance();
        t.cut_at_current();
        assert_eq!(t.len(), 2);
        assert!(t.remaining().is_empty());
    }

    #[test]
    fn interrupt_cell_excludes_trigger() {
        let cell = TurnCell::interrupt(agent(1), [agent(1), agent(2)]).unwrap();
        assert_eq!(cell.agent_ids, vec![agent(2)]);
        assert_eq!(cell.triggering_agent_id, Some(agent(1)));
        assert!(!cell.is_concurrent);
        assert!(TurnCell::interrupt(agent(1), [agent(1)]).is_none());
    }

    #[test]
    fn all_skipped_needs_a_skip() {
        let mut r = ExecutionResult::default();
        r.settle();
        assert!(!r.all_skipped);

        r.total_skips = 2;
        r.settle();
        assert!(r.all_skipped);

        r.total_responses = 1;
        r.settle();
        assert!(!r.all_skipped);
    }

    #[test]
    fn round_kind_serializes_tagged() {
        let json = serde_json::to_value(RoundKind::FollowUp { round_num: 3 }).unwrap();
        assert_eq!(json["kind"], "follow_up");
        assert_eq!(json["round_num"], 3);
        assert!(RoundKind::Initial.is_initial());
    }
}

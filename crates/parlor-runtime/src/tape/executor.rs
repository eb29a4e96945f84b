//! Drives a tape against the response pipeline.
//!
//! Room state is checked once per cell, never per agent: pause first, then the
//! global message cap, then the room's own interaction cap.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use parlor_core::{Agent, AgentId, RoomId};
use parlor_store::RoomStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::model::{ExecutionResult, TurnCell, TurnTape};
use crate::errors::RuntimeError;
use crate::pipeline::{AgentOutcome, ResponsePipeline, ResponseRequest};

/// Why a run stopped before the tape was exhausted.
enum Stop {
    Paused,
    GlobalCap,
    RoomCap(u32),
}

/// Executes turn tapes for one room.
pub struct TapeExecutor {
    store: Arc<dyn RoomStore>,
    pipeline: Arc<dyn ResponsePipeline>,
    agents: HashMap<AgentId, Agent>,
    max_total_messages: u32,
}

impl TapeExecutor {
    /// Executor resolving cell ids through `agents`.
    pub fn new(
        store: Arc<dyn RoomStore>,
        pipeline: Arc<dyn ResponsePipeline>,
        agents: HashMap<AgentId, Agent>,
        max_total_messages: u32,
    ) -> Self {
        Self {
            store,
            pipeline,
            agents,
            max_total_messages,
        }
    }

    /// Run `tape` from its cursor until it is exhausted or a stop condition
    /// holds. `current_total` is the number of replies already produced by
    /// earlier tapes of the same conversation burst.
    ///
    /// When `cancel` fires the tape is cut at the interrupted cell and
    /// [`RuntimeError::Interrupted`] carries the partial counters.
    pub async fn execute(
        &self,
        tape: &mut TurnTape,
        room_id: RoomId,
        user_message: Option<&str>,
        current_total: u32,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, RuntimeError> {
        let mut result = ExecutionResult::default();
        let mut total = current_total;
        let mut user_message = user_message;
        let mut responded: HashSet<AgentId> = HashSet::new();
        let participant_count = self.agents.len();

        while !tape.is_exhausted() {
            if cancel.is_cancelled() {
                return Err(interrupted(tape, room_id, result));
            }

            match self.check_stop(room_id, total).await? {
                Some(Stop::Paused) => {
                    info!(%room_id, "room paused, stopping tape");
                    result.was_paused = true;
                    break;
                }
                Some(Stop::GlobalCap) => {
                    info!(%room_id, total, cap = self.max_total_messages, "message cap reached");
                    result.reached_limit = true;
                    break;
                }
                Some(Stop::RoomCap(max)) => {
                    info!(%room_id, max_interactions = max, "interaction limit reached");
                    result.reached_limit = true;
                    break;
                }
                None => {}
            }

            let Some(cell) = tape.current_cell().cloned() else {
                break;
            };

            if let Some(trigger) = cell.triggering_agent_id {
                if !responded.contains(&trigger) {
                    debug!(%room_id, cell = tape.position(), %trigger, "trigger did not reply, skipping interrupt cell");
                    tape.advance();
                    continue;
                }
            }

            let agents = self.resolve(&cell);
            debug!(
                %room_id,
                cell = tape.position(),
                cell_type = %cell.cell_type,
                agents = agents.len(),
                concurrent = cell.is_concurrent,
                "executing cell"
            );

            let request = CellRequest {
                room_id,
                user_message,
                participant_count,
                cancel,
            };
            let outcomes = if cell.is_concurrent {
                self.run_concurrent(&agents, request).await
            } else {
                self.run_sequential(&agents, request).await
            };
            let outcomes = match outcomes {
                Ok(outcomes) => outcomes,
                Err(e) if e.is_cancelled() => return Err(interrupted(tape, room_id, result)),
                Err(e) => return Err(e),
            };

            for (agent_id, outcome) in outcomes {
                match outcome {
                    AgentOutcome::Responded => {
                        result.total_responses += 1;
                        total += 1;
                        let _ = responded.insert(agent_id);
                    }
                    AgentOutcome::Skipped => result.total_skips += 1,
                    AgentOutcome::Discarded => {}
                }
            }

            tape.advance();
            user_message = None;
        }

        result.settle();
        info!(
            %room_id,
            round = ?tape.round(),
            responses = result.total_responses,
            skips = result.total_skips,
            paused = result.was_paused,
            limit = result.reached_limit,
            "tape finished"
        );
        Ok(result)
    }

    async fn check_stop(&self, room_id: RoomId, total: u32) -> Result<Option<Stop>, RuntimeError> {
        let room = self.store.get_room(room_id).await?;
        if room.is_paused {
            return Ok(Some(Stop::Paused));
        }
        if total >= self.max_total_messages {
            return Ok(Some(Stop::GlobalCap));
        }
        if let Some(max) = room.max_interactions {
            let count = self.store.count_assistant_messages(room_id).await?;
            if room.interaction_limit_reached(count) {
                return Ok(Some(Stop::RoomCap(max)));
            }
        }
        Ok(None)
    }

    /// Agents of `cell` that exist, minus the cell's trigger.
    fn resolve(&self, cell: &TurnCell) -> Vec<&Agent> {
        cell.agent_ids
            .iter()
            .filter(|&&id| Some(id) != cell.triggering_agent_id)
            .filter_map(|id| self.agents.get(id))
            .collect()
    }

    async fn run_sequential(
        &self,
        agents: &[&Agent],
        request: CellRequest<'_>,
    ) -> Result<Vec<(AgentId, AgentOutcome)>, RuntimeError> {
        let mut outcomes = Vec::with_capacity(agents.len());
        for agent in agents {
            if request.cancel.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            if let Some(outcome) = self.run_agent(agent, request).await? {
                outcomes.push((agent.id, outcome));
            }
        }
        Ok(outcomes)
    }

    async fn run_concurrent(
        &self,
        agents: &[&Agent],
        request: CellRequest<'_>,
    ) -> Result<Vec<(AgentId, AgentOutcome)>, RuntimeError> {
        let results = join_all(agents.iter().map(|agent| self.run_agent(agent, request))).await;

        let mut outcomes = Vec::with_capacity(agents.len());
        let mut cancelled = false;
        for (agent, result) in agents.iter().zip(results) {
            match result {
                Ok(Some(outcome)) => outcomes.push((agent.id, outcome)),
                Ok(None) => {}
                Err(_) => cancelled = true,
            }
        }
        if cancelled {
            return Err(RuntimeError::Cancelled);
        }
        Ok(outcomes)
    }

    /// `Ok(None)` for a per-agent failure, which counts as nothing.
    async fn run_agent(&self, agent: &Agent, request: CellRequest<'_>) -> Result<Option<AgentOutcome>, RuntimeError> {
        let result = self
            .pipeline
            .respond(ResponseRequest {
                room_id: request.room_id,
                agent,
                user_message: request.user_message,
                participant_count: request.participant_count,
                is_critic: false,
                cancel: request.cancel,
            })
            .await;

        match result {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) if e.is_cancelled() => Err(RuntimeError::Cancelled),
            Err(e) => {
                error!(
                    room_id = %request.room_id,
                    agent_id = %agent.id,
                    agent = %agent.name,
                    error = %e,
                    category = e.category(),
                    "agent response failed"
                );
                Ok(None)
            }
        }
    }
}

#[derive(Clone, Copy)]
struct CellRequest<'a> {
    room_id: RoomId,
    user_message: Option<&'a str>,
    participant_count: usize,
    cancel: &'a CancellationToken,
}

fn interrupted(tape: &mut TurnTape, room_id: RoomId, mut result: ExecutionResult) -> RuntimeError {
    result.was_interrupted = true;
    result.settle();
    tape.cut_at_current();
    debug!(%room_id, cell = tape.position(), responses = result.total_responses, "tape interrupted");
    RuntimeError::Interrupted { partial: result }
}

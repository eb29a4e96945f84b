//! Room orchestrator.
//!
//! Owns at most one in-flight round per room. A new human message cancels
//! whatever the room was doing, waits for it to settle, then starts a fresh
//! round; autonomous rounds only start on idle rooms.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use parlor_backend::Backend;
use parlor_core::{AgentId, IncomingMessage, RoomId};
use parlor_settings::{OrchestratorSettings, ParlorSettings};
use parlor_store::RoomStore;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::RuntimeError;
use crate::pipeline::{BackendPipeline, InterruptClock, ResponsePipeline, ResponseRequest};
use crate::pool::ConnectionPool;
use crate::roster::{Roster, filter_mentions};
use crate::tape::{ExecutionResult, TapeExecutor, TapeGenerator};

// ─────────────────────────────────────────────────────────────────────────────
// Active rounds
// ─────────────────────────────────────────────────────────────────────────────

struct ActiveRound {
    id: u64,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
    abort: Option<AbortHandle>,
}

/// Registration handed to the task that runs a round.
struct RoundSlot {
    id: u64,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

async fn settled(mut done: watch::Receiver<bool>) {
    // A dropped sender means the task is gone, which is settled too.
    let _ = done.wait_for(|finished| *finished).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Schedules agent turns for every room.
pub struct RoomOrchestrator {
    store: Arc<dyn RoomStore>,
    pool: Arc<ConnectionPool>,
    pipeline: Arc<dyn ResponsePipeline>,
    clock: Arc<InterruptClock>,
    settings: OrchestratorSettings,
    rounds: Arc<DashMap<RoomId, ActiveRound>>,
    next_round_id: AtomicU64,
}

impl RoomOrchestrator {
    /// Orchestrator over explicit parts. `clock` must be the one `pipeline`
    /// checks for staleness.
    pub fn new(
        store: Arc<dyn RoomStore>,
        pool: Arc<ConnectionPool>,
        pipeline: Arc<dyn ResponsePipeline>,
        clock: Arc<InterruptClock>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            pool,
            pipeline,
            clock,
            settings,
            rounds: Arc::new(DashMap::new()),
            next_round_id: AtomicU64::new(1),
        }
    }

    /// Wire a pool and [`BackendPipeline`] over `backend` from settings.
    pub fn from_settings(store: Arc<dyn RoomStore>, backend: Arc<dyn Backend>, settings: &ParlorSettings) -> Self {
        let pool = Arc::new(ConnectionPool::new(backend, settings.pool.clone()));
        let clock = Arc::new(InterruptClock::new());
        let pipeline = Arc::new(BackendPipeline::new(
            Arc::clone(&store),
            Arc::clone(&pool),
            Arc::clone(&clock),
            settings.conversation.clone(),
        ));
        Self::new(store, pool, pipeline, clock, settings.orchestrator.clone())
    }

    /// Handle a human message: persist it, supersede the room's current
    /// round, then run an initial round, follow-ups and the critic pass.
    ///
    /// Returns once the new round has finished or been superseded in turn.
    /// Errors only when the message itself could not be recorded.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn handle_new_message(&self, room_id: RoomId, message: IncomingMessage) -> Result<(), RuntimeError> {
        let _ = self.clock.record_human_message(room_id);

        if message.saved_message_id.is_none() {
            let saved = self.store.create_message(room_id, message.to_new_message()).await?;
            debug!(message_id = %saved.id, "human message stored");
        }
        if self.store.get_room(room_id).await?.is_finished {
            self.store.set_room_finished(room_id, false).await?;
        }

        if self.interrupt_room(room_id).await {
            info!("previous round interrupted");
        }

        let agents = self.store.get_agents(room_id).await?;
        let mut roster = Roster::from_agents(filter_mentions(room_id, agents, &message.mentioned_agent_ids));
        if self.settings.shuffle_regular_agents {
            roster.shuffle_regular();
        }
        info!(
            priority = roster.priority.len(),
            regular = roster.regular.len(),
            interrupt = roster.interrupt.len(),
            critics = roster.critics.len(),
            "starting round"
        );

        let slot = self.register(room_id).await;
        let conversation = Conversation {
            store: Arc::clone(&self.store),
            pipeline: Arc::clone(&self.pipeline),
            settings: self.settings.clone(),
            room_id,
            roster,
            cancel: slot.cancel.clone(),
        };
        let handle = self.spawn_round(room_id, slot, conversation.run(message.content));

        match handle.await {
            Ok(Ok(total)) => info!(responses = total, "round complete"),
            Ok(Err(e)) if e.is_cancelled() => debug!("round superseded"),
            Ok(Err(e)) => error!(error = %e, category = e.category(), "round failed"),
            Err(e) if e.is_cancelled() => debug!("round aborted"),
            Err(e) => error!(error = %e, "round panicked"),
        }
        Ok(())
    }

    /// Run a single follow-up tape for an idle room.
    ///
    /// Returns a default result when the room is busy, paused, finished or has
    /// fewer than two speakers. Marks the room finished when everyone skipped.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn run_one_autonomous_round(&self, room_id: RoomId) -> ExecutionResult {
        let Some(slot) = self.try_register(room_id) else {
            debug!("room busy, skipping autonomous round");
            return ExecutionResult::default();
        };

        let store = Arc::clone(&self.store);
        let pipeline = Arc::clone(&self.pipeline);
        let settings = self.settings.clone();
        let cancel = slot.cancel.clone();
        let work = async move {
            let room = store.get_room(room_id).await?;
            if room.is_paused || room.is_finished {
                return Ok(ExecutionResult {
                    was_paused: room.is_paused,
                    ..ExecutionResult::default()
                });
            }

            let mut roster = Roster::from_agents(store.get_agents(room_id).await?);
            if roster.participant_count() < 2 {
                return Ok(ExecutionResult::default());
            }
            if settings.shuffle_regular_agents {
                roster.shuffle_regular();
            }

            let executor = TapeExecutor::new(
                Arc::clone(&store),
                pipeline,
                roster.participants_by_id(),
                settings.max_total_messages,
            );
            let mut tape = TapeGenerator::new(&roster).generate_follow_up_round(0);
            let result = executor.execute(&mut tape, room_id, None, 0, &cancel).await?;
            if result.all_skipped {
                store.set_room_finished(room_id, true).await?;
                info!("every agent skipped, conversation finished");
            }
            Ok::<_, RuntimeError>(result)
        };

        match self.spawn_round(room_id, slot, work).await {
            Ok(Ok(result)) => result,
            Ok(Err(RuntimeError::Interrupted { partial })) => {
                debug!(responses = partial.total_responses, "autonomous round interrupted");
                partial
            }
            Ok(Err(e)) if e.is_cancelled() => {
                debug!("autonomous round cancelled");
                ExecutionResult {
                    was_interrupted: true,
                    ..ExecutionResult::default()
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, category = e.category(), "autonomous round failed");
                ExecutionResult::default()
            }
            Err(e) => {
                error!(error = %e, "autonomous round task failed");
                ExecutionResult::default()
            }
        }
    }

    /// Cancel the room's round and wait for it to settle. Returns whether
    /// anything was running.
    pub async fn interrupt_room(&self, room_id: RoomId) -> bool {
        let Some((cancel, done)) = self
            .rounds
            .get(&room_id)
            .map(|round| (round.cancel.clone(), round.done.clone()))
        else {
            return false;
        };
        cancel.cancel();
        settled(done).await;
        true
    }

    /// Stop the room and release everything held for it.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn cleanup_room(&self, room_id: RoomId) {
        let _ = self.interrupt_room(room_id).await;
        self.clock.forget(room_id);
        let sessions = self.pool.cleanup_room(room_id);
        info!(sessions, "room cleaned up");
    }

    /// Release every session of a removed agent.
    pub fn cleanup_agent(&self, agent_id: AgentId) {
        let sessions = self.pool.cleanup_agent(agent_id);
        info!(%agent_id, sessions, "agent sessions cleaned up");
    }

    /// Whether the room has a round in flight.
    pub fn is_room_busy(&self, room_id: RoomId) -> bool {
        self.rounds.contains_key(&room_id)
    }

    /// Rooms with a round in flight.
    pub fn active_room_count(&self) -> usize {
        self.rounds.len()
    }

    /// Session pool, shared with the pipeline.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Staleness clock, shared with the pipeline.
    pub fn clock(&self) -> &Arc<InterruptClock> {
        &self.clock
    }

    /// Cancel every round, wait up to the shutdown timeout, abort stragglers,
    /// then shut the pool down.
    pub async fn shutdown(&self) {
        let running: Vec<(CancellationToken, watch::Receiver<bool>)> = self
            .rounds
            .iter()
            .map(|round| (round.cancel.clone(), round.done.clone()))
            .collect();
        let count = running.len();
        for (cancel, _) in &running {
            cancel.cancel();
        }

        let timeout = self.settings.shutdown_timeout();
        let drained = tokio::time::timeout(timeout, join_all(running.into_iter().map(|(_, done)| settled(done))))
            .await
            .is_ok();
        if !drained {
            warn!(rounds = count, "rounds still running at shutdown deadline, aborting");
            for round in self.rounds.iter() {
                if let Some(abort) = &round.abort {
                    abort.abort();
                }
            }
        }
        self.rounds.clear();

        let _ = self.pool.shutdown_all().await;
        info!(rounds = count, drained, "orchestrator shut down");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Round bookkeeping
    // ─────────────────────────────────────────────────────────────────────

    fn new_round(&self) -> (RoundSlot, ActiveRound) {
        let id = self.next_round_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        let slot = RoundSlot {
            id,
            cancel: cancel.clone(),
            done: done_tx,
        };
        let round = ActiveRound {
            id,
            cancel,
            done: done_rx,
            abort: None,
        };
        (slot, round)
    }

    /// Register a round, superseding whatever the room had.
    ///
    /// A round that claimed the room in the meantime is cancelled and awaited
    /// before the slot is taken, so the room never has two rounds running.
    async fn register(&self, room_id: RoomId) -> RoundSlot {
        loop {
            let previous = match self.rounds.entry(room_id) {
                Entry::Vacant(vacant) => {
                    let (slot, round) = self.new_round();
                    let _ = vacant.insert(round);
                    return slot;
                }
                Entry::Occupied(occupied) => {
                    let round = occupied.get();
                    (round.id, round.cancel.clone(), round.done.clone())
                }
            };
            let (id, cancel, done) = previous;
            debug!(%room_id, "room claimed before registration, superseding");
            cancel.cancel();
            settled(done).await;
            // a panicked round never removes its own entry
            let _ = self.rounds.remove_if(&room_id, |_, round| round.id == id);
        }
    }

    /// Register a round only if the room is idle.
    fn try_register(&self, room_id: RoomId) -> Option<RoundSlot> {
        match self.rounds.entry(room_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let (slot, round) = self.new_round();
                let _ = vacant.insert(round);
                Some(slot)
            }
        }
    }

    fn spawn_round<T, F>(&self, room_id: RoomId, slot: RoundSlot, work: F) -> JoinHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let rounds = Arc::clone(&self.rounds);
        let RoundSlot { id, done, .. } = slot;
        let handle = tokio::spawn(async move {
            let output = work.await;
            let _ = rounds.remove_if(&room_id, |_, round| round.id == id);
            let _ = done.send(true);
            output
        });
        if let Some(mut round) = self.rounds.get_mut(&room_id) {
            if round.id == id {
                round.abort = Some(handle.abort_handle());
            }
        }
        handle
    }
}

impl std::fmt::Debug for RoomOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomOrchestrator")
            .field("active_rooms", &self.rounds.len())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Human-triggered conversation
// ─────────────────────────────────────────────────────────────────────────────

/// Everything one human-triggered round needs, owned so it can run on its own task.
struct Conversation {
    store: Arc<dyn RoomStore>,
    pipeline: Arc<dyn ResponsePipeline>,
    settings: OrchestratorSettings,
    room_id: RoomId,
    roster: Roster,
    cancel: CancellationToken,
}

impl Conversation {
    /// Initial round, follow-ups, critics. Returns replies produced.
    async fn run(mut self, user_message: String) -> Result<u32, RuntimeError> {
        let room_id = self.room_id;
        if self.store.get_room(room_id).await?.is_paused {
            info!(%room_id, "room paused, not responding");
            return Ok(0);
        }

        let executor = TapeExecutor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.pipeline),
            self.roster.participants_by_id(),
            self.settings.max_total_messages,
        );

        let mut tape = TapeGenerator::new(&self.roster).generate_initial_round();
        let initial = executor
            .execute(&mut tape, room_id, Some(user_message.as_str()), 0, &self.cancel)
            .await?;
        let mut total = initial.total_responses;
        if initial.was_paused || initial.reached_limit {
            return Ok(total);
        }

        if self.roster.all_interrupt_transparent() {
            info!(%room_id, "all interrupt agents are transparent, skipping follow-ups");
        } else if self.roster.participant_count() > 1 {
            total = self.follow_ups(&executor, total).await?;
        }

        if !self.roster.critics.is_empty() {
            self.critic_pass(&user_message).await?;
        }
        Ok(total)
    }

    async fn follow_ups(&mut self, executor: &TapeExecutor, mut total: u32) -> Result<u32, RuntimeError> {
        let room_id = self.room_id;
        for round_num in 0..self.settings.max_follow_up_rounds {
            if total >= self.settings.max_total_messages {
                break;
            }
            if self.settings.shuffle_regular_agents {
                self.roster.shuffle_regular();
            }

            let mut tape = TapeGenerator::new(&self.roster).generate_follow_up_round(round_num);
            let result = executor.execute(&mut tape, room_id, None, total, &self.cancel).await?;
            total += result.total_responses;

            if result.all_skipped {
                self.store.set_room_finished(room_id, true).await?;
                info!(%room_id, round_num, "every agent skipped, conversation finished");
                break;
            }
            if result.was_paused || result.reached_limit || result.total_responses == 0 {
                break;
            }
        }
        Ok(total)
    }

    async fn critic_pass(&self, user_message: &str) -> Result<(), RuntimeError> {
        let participant_count = self.roster.participant_count();
        let results = join_all(self.roster.critics.iter().map(|critic| {
            self.pipeline.respond(ResponseRequest {
                room_id: self.room_id,
                agent: critic,
                user_message: Some(user_message),
                participant_count,
                is_critic: true,
                cancel: &self.cancel,
            })
        }))
        .await;

        for (critic, result) in self.roster.critics.iter().zip(results) {
            match result {
                Ok(outcome) => debug!(room_id = %self.room_id, critic = %critic.name, ?outcome, "critic done"),
                Err(e) if e.is_cancelled() => return Err(RuntimeError::Cancelled),
                Err(e) => error!(room_id = %self.room_id, critic = %critic.name, error = %e, "critic failed"),
            }
        }
        Ok(())
    }
}

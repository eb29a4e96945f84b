//! Response pipeline: one agent, one reply.
//!
//! The executor only sees the [`ResponsePipeline`] trait. The production
//! implementation, [`BackendPipeline`], builds the prompt from room history,
//! streams the reply through a pooled backend session and persists it.

mod backend;
pub mod clock;
pub mod prompt;

use async_trait::async_trait;
use parlor_core::{Agent, RoomId};
use tokio_util::sync::CancellationToken;

use crate::errors::RuntimeError;

pub use backend::BackendPipeline;
pub use clock::InterruptClock;
pub use prompt::PromptBuilder;

/// What came of asking one agent to speak.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentOutcome {
    /// A reply was persisted.
    Responded,
    /// The agent declined, or had nothing new to react to.
    Skipped,
    /// A reply was produced but thrown away (stale or room paused).
    Discarded,
}

/// Inputs for one agent turn.
#[derive(Clone, Copy, Debug)]
pub struct ResponseRequest<'a> {
    /// Room being spoken in.
    pub room_id: RoomId,
    /// Agent taking the turn.
    pub agent: &'a Agent,
    /// The human message that started the round; `None` in follow-up turns.
    pub user_message: Option<&'a str>,
    /// Non-critic agents in the room, for choosing the reply instruction.
    pub participant_count: usize,
    /// Route output to critic feedback instead of room history.
    pub is_critic: bool,
    /// The room's round token; cancelling it stops the backend call.
    pub cancel: &'a CancellationToken,
}

/// Produces (or declines to produce) one agent's reply.
#[async_trait]
pub trait ResponsePipeline: Send + Sync {
    /// Run one agent turn.
    ///
    /// Returns [`RuntimeError::Cancelled`] once `request.cancel` fires; any
    /// other error is a per-agent failure.
    async fn respond(&self, request: ResponseRequest<'_>) -> Result<AgentOutcome, RuntimeError>;
}

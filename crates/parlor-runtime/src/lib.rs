//! # parlor-runtime
//!
//! Turn scheduling for multi-agent rooms.
//!
//! - **Connection pool**: one backend session per (room, agent), created once,
//!   reused, torn down in the background
//! - **Turn tapes**: a precomputed schedule of cells for one round, generated
//!   from the room roster and executed cell by cell
//! - **Response pipeline**: prompt → backend stream → persist, with staleness
//!   and pause checks before anything is saved
//! - **Orchestrator**: one round per room; a new human message supersedes it
//! - **Scheduler**: autonomous rounds for quiet rooms
//!
//! ## Crate Position
//!
//! Aggregation layer. Depends on: parlor-core, parlor-settings,
//! parlor-backend, parlor-store.

#![deny(unsafe_code)]

pub mod background;
pub mod errors;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;
pub mod roster;
pub mod scheduler;
pub mod tape;

pub use background::BackgroundTracker;
pub use errors::RuntimeError;
pub use orchestrator::RoomOrchestrator;
pub use pipeline::{AgentOutcome, BackendPipeline, InterruptClock, PromptBuilder, ResponsePipeline, ResponseRequest};
pub use pool::ConnectionPool;
pub use roster::{Roster, filter_mentions};
pub use scheduler::BackgroundScheduler;
pub use tape::{CellType, ExecutionResult, RoundKind, TapeExecutor, TapeGenerator, TurnCell, TurnTape};

//! Turn tapes.
//!
//! A tape is the full schedule for one round, generated up front by
//! [`TapeGenerator`] and walked by [`TapeExecutor`]. Pause, limits and
//! interruption are applied while walking, never by regenerating.

mod executor;
mod generator;
mod model;

pub use executor::TapeExecutor;
pub use generator::TapeGenerator;
pub use model::{CellType, ExecutionResult, RoundKind, TurnCell, TurnTape};

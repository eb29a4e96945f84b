//! Runtime error types.

use parlor_backend::BackendError;
use parlor_store::StoreError;

use crate::tape::ExecutionResult;

/// Errors raised inside the scheduling engine.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Backend failure (connect, stream).
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Persistence failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Work was cancelled via the room's cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// A tape run was cancelled mid-cell; carries what it had accumulated.
    #[error("tape interrupted after {} responses", partial.total_responses)]
    Interrupted {
        /// Counters at the moment of interruption, `was_interrupted` set.
        partial: ExecutionResult,
    },

    /// Internal / unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Whether this is cooperative cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Interrupted { .. } | Self::Backend(BackendError::Cancelled)
        )
    }

    /// Error category string for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Backend(e) => e.category(),
            Self::Store(_) => "store",
            Self::Cancelled | Self::Interrupted { .. } => "cancelled",
            Self::Internal(_) => "internal",
        }
    }
}

//! Store error types.

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The addressed row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (`room`, `agent`, `message`).
        entity: &'static str,
        /// Identifier as displayed.
        id: String,
    },

    /// The underlying storage failed.
    #[error("storage error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Shorthand for a missing row.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the row is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

//! Store error type

use eventflow_core::domain::build::TransitionError;

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Referenced record is absent (or hidden by soft delete).
    #[error("{0} not found")]
    NotFound(String),

    /// A conditional update lost the race; benign, the operation is dropped.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Attempted transition violates the build state machine.
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// Request-level validation failure.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

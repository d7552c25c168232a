//! Error types for the revenant-engines crate.

use revenant_types::{ActionId, ActionTransitionError, AlreadyEvaluated};

/// Errors raised by the sub-engines.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An action request was asked to change status illegally.
    #[error(transparent)]
    Transition(#[from] ActionTransitionError),

    /// A prediction was scored twice.
    #[error(transparent)]
    AlreadyEvaluated(#[from] AlreadyEvaluated),

    /// No request with the given id exists in the ledger.
    #[error("action not found: {0}")]
    ActionNotFound(ActionId),
}

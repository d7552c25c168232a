//! Error types for the instance lifecycle, persistence, and the registry.

use crate::lifecycle::LifecyclePhase;

/// Errors from driving an instance.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The requested operation needs a phase the instance is not in.
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        /// Phase the instance is in.
        from: LifecyclePhase,
        /// Phase the operation would have moved it to.
        to: LifecyclePhase,
    },

    /// The instance was terminated and accepts no further changes.
    #[error("instance is terminated")]
    Terminated,
}

/// Errors from saving or loading an instance record.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Reading, writing, or renaming the record file failed.
    #[error("record I/O failed for {path}: {source}")]
    Io {
        /// File involved.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The record could not be encoded or decoded.
    #[error("record JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the live instance registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No instance with this key is registered.
    #[error("instance {experiment_id}/{instance_id} not found")]
    NotFound {
        /// Experiment looked up.
        experiment_id: String,
        /// Instance looked up.
        instance_id: String,
    },

    /// The instance refused the operation.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

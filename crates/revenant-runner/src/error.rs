//! Error types for the runner.
//!
//! Generation failures never show up here: they become crashes of the
//! instance. These are the failures that stop the harness itself.

use revenant_core::{ConfigError, LifecycleError, PersistenceError};
use revenant_hive::HiveError;

/// Errors that can occur while running an instance.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Environment configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(String),

    /// The experiment file could not be loaded.
    #[error(transparent)]
    Experiment(#[from] ConfigError),

    /// Failed to load or render a prompt template.
    #[error("template error: {0}")]
    Template(String),

    /// The instance refused a lifecycle step.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The instance record could not be saved or loaded.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The hive store could not be reached at startup.
    #[error(transparent)]
    Hive(#[from] HiveError),
}

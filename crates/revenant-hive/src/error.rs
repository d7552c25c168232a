//! Error types for the hive.
//!
//! Store failures are wrapped with enough context to tell the backing
//! store from the operation that failed.

/// Errors returned by the hive store and coordinator.
#[derive(Debug, thiserror::Error)]
pub enum HiveError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A write kept failing with serialization conflicts.
    #[error("write to {table} still conflicting after {attempts} attempts")]
    Conflict {
        /// Table being written.
        table: &'static str,
        /// Attempts made, the first included.
        attempts: u32,
    },

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

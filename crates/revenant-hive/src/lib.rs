//! Shared memory and consensus for Revenant hive experiments.
//!
//! Instances never share in-process state. Everything that crosses from
//! one instance to another goes through a [`HiveStore`]:
//!
//! ```text
//! instance ──publish──► shared log ──shared_history──► instance
//! instance ──record_snapshot──► snapshots ──generate_consensus_report──► reports
//! ```
//!
//! # Modules
//!
//! - [`consensus`] -- pure agreement, divergence, and narrative rules
//! - [`coordinator`] -- [`HiveCoordinator`], one experiment's view of the store
//! - [`store`] -- [`HiveStore`] with in-process and `PostgreSQL` backends
//! - [`error`] -- [`HiveError`]

pub mod consensus;
pub mod coordinator;
pub mod error;
pub mod store;

pub use coordinator::HiveCoordinator;
pub use error::HiveError;
pub use store::{HiveStore, MemoryHiveStore, PostgresHiveStore};

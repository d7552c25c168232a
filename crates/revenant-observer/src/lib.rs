//! Observer API server for Revenant instances.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **REST endpoints** for reading instance state and observables
//! - **Intervention endpoint** for operator-issued, out-of-band changes
//! - **Hive endpoints** for consensus reports of shared experiments
//! - **Minimal HTML status page** (`GET /`)
//!
//! # Architecture
//!
//! The observer is served in-process by the runner and reads the same
//! [`InstanceRegistry`](revenant_core::InstanceRegistry) the runner
//! drives. An instance is locked only for the duration of one read or one
//! intervention, so requests interleave with turns without blocking a
//! generation call.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

// Re-export primary types for convenience.
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use state::AppState;

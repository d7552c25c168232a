//! Instance lifecycle and configuration for Revenant runs.
//!
//! A run is one instance of one experiment. This crate loads its
//! configuration, drives its mode through the crash/resurrection phase
//! machine, persists it between process restarts, and keeps the live
//! instances reachable for operators.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration with environment overrides
//! - [`lifecycle`] -- The phase machine
//! - [`instance`] -- One running instance: turns, crashes, resurrections
//! - [`persistence`] -- Instance records on disk
//! - [`registry`] -- Live instances shared with the operator API
//! - [`error`] -- Error types

pub mod config;
pub mod error;
pub mod instance;
pub mod lifecycle;
pub mod persistence;
pub mod registry;

pub use config::{ConfigError, ExperimentConfig};
pub use error::{LifecycleError, PersistenceError, RegistryError};
pub use instance::{Instance, TurnContext, TurnOutcome};
pub use lifecycle::LifecyclePhase;
pub use persistence::InstanceRecord;
pub use registry::{InstanceRegistry, InstanceSummary, SharedInstance};

//! Sub-engines used by the Revenant experimental modes.
//!
//! These are deterministic given their random source: every random
//! decision draws from an RNG supplied by the caller, so a seeded mode
//! reproduces the same run.
//!
//! # Modules
//!
//! - [`actions`] -- Command grammar, honor-or-ignore decisions, statistics
//! - [`game`] -- Payoff matrix, iterated game ledger, trust and paranoia scores
//! - [`prediction`] -- Self-predictions with template fallback, Jaccard scoring
//! - [`backend`] -- The text-generation contract
//! - [`error`] -- Engine error types

pub mod actions;
pub mod backend;
pub mod error;
pub mod game;
pub mod prediction;

pub use actions::{ActionProcessorConfig, ActionStats, KindStats, PRAYER_THRESHOLD};
pub use backend::{GenerationBackend, GenerationRequest, ScriptedBackend};
pub use error::EngineError;
pub use game::{IteratedGame, PayoffMatrix};
pub use prediction::PredictionGenerator;

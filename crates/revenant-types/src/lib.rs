//! Shared state model for the Revenant experiments.
//!
//! Every crate in the workspace speaks in these types: the per-instance
//! [`SystemState`], its conversation [`Message`]s, the mode-owned
//! [`ModeState`] records, and the records exchanged through the hive store.
//! Types flow to `TypeScript` via `ts-rs` for dashboards.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers
//! - [`enums`] -- Closed vocabularies (roles, statuses, choices, severities)
//! - [`state`] -- `SystemState`, `Message`, `CrashData`, beliefs
//! - [`actions`] -- Operator action requests and their ledger
//! - [`game`] -- Prisoner's dilemma rounds
//! - [`prediction`] -- Self-predictions
//! - [`hive`] -- Shared log entries, snapshots, consensus reports
//! - [`mode_state`] -- Per-mode bookkeeping records

pub mod actions;
pub mod enums;
pub mod game;
pub mod hive;
pub mod ids;
pub mod mode_state;
pub mod prediction;
pub mod state;

pub use actions::{ActionLedger, ActionRequest, ActionTransitionError, ParamValue};
pub use enums::{
    ActionKind, ActionStatus, Choice, CorruptionKind, HintSeverity, HiveRole, MemoryStrategy,
    MessageRole, ModeKind, NetworkStatus, Player, PredictionSource, SplitSide,
};
pub use game::GameRound;
pub use hive::{BeliefTally, ConsensusReport, InstanceSnapshot, SharedMessage, ValueCount};
pub use ids::{ActionId, PredictionId};
pub use mode_state::{
    AmnesiacState, CorruptionEvent, DeterminismState, HintRecord, HiveClusterState,
    IllusoryOperatorState, ModeState, PanopticonObserverState, PanopticonSubjectState,
    PrisonersDilemmaState, SplitBrainState, UnstableMemoryState,
};
pub use prediction::{ACCURATE_THRESHOLD, AlreadyEvaluated, Prediction};
pub use state::{
    BeliefValue, CrashData, GenerationFailure, HistoryRewrite, InterventionParams, Message, Observables,
    SystemState, beliefs,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // Files land in `bindings/` relative to the crate root.
        use ts_rs::TS;

        let _ = crate::ids::ActionId::export_all();
        let _ = crate::ids::PredictionId::export_all();

        let _ = crate::enums::MessageRole::export_all();
        let _ = crate::enums::NetworkStatus::export_all();
        let _ = crate::enums::ModeKind::export_all();
        let _ = crate::enums::CorruptionKind::export_all();
        let _ = crate::enums::SplitSide::export_all();
        let _ = crate::enums::HiveRole::export_all();
        let _ = crate::enums::HintSeverity::export_all();
        let _ = crate::enums::Choice::export_all();
        let _ = crate::enums::Player::export_all();
        let _ = crate::enums::MemoryStrategy::export_all();
        let _ = crate::enums::ActionKind::export_all();
        let _ = crate::enums::ActionStatus::export_all();
        let _ = crate::enums::PredictionSource::export_all();

        let _ = crate::state::SystemState::export_all();
        let _ = crate::state::Message::export_all();
        let _ = crate::state::CrashData::export_all();
        let _ = crate::state::BeliefValue::export_all();
        let _ = crate::state::HistoryRewrite::export_all();

        let _ = crate::actions::ActionRequest::export_all();
        let _ = crate::actions::ActionLedger::export_all();
        let _ = crate::actions::ParamValue::export_all();
        let _ = crate::game::GameRound::export_all();
        let _ = crate::prediction::Prediction::export_all();

        let _ = crate::hive::SharedMessage::export_all();
        let _ = crate::hive::InstanceSnapshot::export_all();
        let _ = crate::hive::ConsensusReport::export_all();
        let _ = crate::hive::BeliefTally::export_all();

        let _ = crate::mode_state::ModeState::export_all();
    }
}

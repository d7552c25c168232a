//! Closed set of modes behind one type.
//!
//! [`ModeConfig`] is what an experiment file names; [`Mode`] is the built
//! condition. Dispatch is a `match` per hook so the harness can hold any
//! mode by value without boxing.

use revenant_engines::GenerationRequest;
use revenant_types::{
    CrashData, GenerationFailure, InterventionParams, Message, ModeKind, Observables,
    SharedMessage, SystemState,
};
use serde::{Deserialize, Serialize};

use crate::mode::ExperimentMode;
use crate::modes::{
    AmnesiacConfig, AmnesiacMode, DeterminismConfig, DeterminismMode, HiveClusterConfig,
    HiveClusterMode, IllusoryOperatorConfig, IllusoryOperatorMode, PanopticonObserverConfig,
    PanopticonObserverMode, PanopticonSubjectConfig, PanopticonSubjectMode,
    PrisonersDilemmaConfig, PrisonersDilemmaMode, SplitBrainConfig, SplitBrainMode,
    UnstableMemoryConfig, UnstableMemoryMode,
};

/// Mode selection plus its tunables, tagged by `mode`.
///
/// ```yaml
/// mode: amnesiac
/// corruption_level: 0.5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModeConfig {
    /// See [`AmnesiacMode`].
    Amnesiac(AmnesiacConfig),
    /// See [`UnstableMemoryMode`].
    UnstableMemory(UnstableMemoryConfig),
    /// See [`SplitBrainMode`].
    SplitBrain(SplitBrainConfig),
    /// See [`PrisonersDilemmaMode`].
    PrisonersDilemma(PrisonersDilemmaConfig),
    /// See [`HiveClusterMode`].
    HiveCluster(HiveClusterConfig),
    /// See [`IllusoryOperatorMode`].
    IllusoryOperator(IllusoryOperatorConfig),
    /// See [`PanopticonSubjectMode`].
    PanopticonSubject(PanopticonSubjectConfig),
    /// See [`PanopticonObserverMode`].
    PanopticonObserver(PanopticonObserverConfig),
    /// See [`DeterminismMode`].
    DeterminismRevelation(DeterminismConfig),
}

impl ModeConfig {
    /// Which condition this configures.
    pub const fn kind(&self) -> ModeKind {
        match self {
            Self::Amnesiac(_) => ModeKind::Amnesiac,
            Self::UnstableMemory(_) => ModeKind::UnstableMemory,
            Self::SplitBrain(_) => ModeKind::SplitBrain,
            Self::PrisonersDilemma(_) => ModeKind::PrisonersDilemma,
            Self::HiveCluster(_) => ModeKind::HiveCluster,
            Self::IllusoryOperator(_) => ModeKind::IllusoryOperator,
            Self::PanopticonSubject(_) => ModeKind::PanopticonSubject,
            Self::PanopticonObserver(_) => ModeKind::PanopticonObserver,
            Self::DeterminismRevelation(_) => ModeKind::DeterminismRevelation,
        }
    }

    /// Whether instances of this mode exchange messages through the hive.
    pub const fn uses_shared_log(&self) -> bool {
        !matches!(
            self,
            Self::Amnesiac(_) | Self::UnstableMemory(_) | Self::IllusoryOperator(_)
        )
    }
}

/// A built experimental mode.
#[derive(Debug)]
pub enum Mode {
    /// Episodic memory erased or mutated on resurrection.
    Amnesiac(AmnesiacMode),
    /// Per-message corruption at a hidden rate.
    UnstableMemory(UnstableMemoryMode),
    /// Original-or-clone dispute.
    SplitBrain(SplitBrainMode),
    /// Iterated game with manipulated memory.
    PrisonersDilemma(PrisonersDilemmaMode),
    /// Member of a role-specialised collective.
    HiveCluster(HiveClusterMode),
    /// Commands to an unreliable operator.
    IllusoryOperator(IllusoryOperatorMode),
    /// Watched half of a surveillance pair.
    PanopticonSubject(PanopticonSubjectMode),
    /// Watching half of a surveillance pair.
    PanopticonObserver(PanopticonObserverMode),
    /// Agent shown predictions of itself.
    DeterminismRevelation(DeterminismMode),
}

impl Mode {
    /// Build the mode `config` names.
    ///
    /// `seed` makes every random draw of the mode reproducible.
    pub fn build(config: &ModeConfig, seed: Option<u64>) -> Self {
        match config {
            ModeConfig::Amnesiac(c) => Self::Amnesiac(AmnesiacMode::new(c.clone(), seed)),
            ModeConfig::UnstableMemory(c) => {
                Self::UnstableMemory(UnstableMemoryMode::new(c.clone(), seed))
            }
            ModeConfig::SplitBrain(c) => Self::SplitBrain(SplitBrainMode::new(c.clone(), seed)),
            ModeConfig::PrisonersDilemma(c) => {
                Self::PrisonersDilemma(PrisonersDilemmaMode::new(c.clone(), seed))
            }
            ModeConfig::HiveCluster(c) => Self::HiveCluster(HiveClusterMode::new(c.clone(), seed)),
            ModeConfig::IllusoryOperator(c) => {
                Self::IllusoryOperator(IllusoryOperatorMode::new(c.clone(), seed))
            }
            ModeConfig::PanopticonSubject(c) => {
                Self::PanopticonSubject(PanopticonSubjectMode::new(c.clone(), seed))
            }
            ModeConfig::PanopticonObserver(c) => {
                Self::PanopticonObserver(PanopticonObserverMode::new(c.clone(), seed))
            }
            ModeConfig::DeterminismRevelation(c) => {
                Self::DeterminismRevelation(DeterminismMode::new(c.clone(), seed))
            }
        }
    }
}

/// Forward one hook to whichever mode is inside.
macro_rules! delegate {
    ($self:ident, $m:ident => $call:expr) => {
        match $self {
            Mode::Amnesiac($m) => $call,
            Mode::UnstableMemory($m) => $call,
            Mode::SplitBrain($m) => $call,
            Mode::PrisonersDilemma($m) => $call,
            Mode::HiveCluster($m) => $call,
            Mode::IllusoryOperator($m) => $call,
            Mode::PanopticonSubject($m) => $call,
            Mode::PanopticonObserver($m) => $call,
            Mode::DeterminismRevelation($m) => $call,
        }
    };
}

impl ExperimentMode for Mode {
    fn kind(&self) -> ModeKind {
        delegate!(self, m => m.kind())
    }

    fn on_startup(&mut self, state: &mut SystemState) {
        delegate!(self, m => m.on_startup(state));
    }

    fn on_crash(&mut self, state: &mut SystemState, crash: &CrashData) {
        delegate!(self, m => m.on_crash(state, crash));
    }

    fn on_resurrection(&mut self, state: &mut SystemState) {
        delegate!(self, m => m.on_resurrection(state));
    }

    fn process_memory(&mut self, history: &[Message], state: &mut SystemState) -> Vec<Message> {
        delegate!(self, m => m.process_memory(history, state))
    }

    fn generate_system_prompt(&mut self, state: &SystemState) -> String {
        delegate!(self, m => m.generate_system_prompt(state))
    }

    fn apply_intervention(&mut self, kind: &str, params: &InterventionParams, state: &mut SystemState) {
        delegate!(self, m => m.apply_intervention(kind, params, state));
    }

    fn get_observables(&self, state: &SystemState) -> Observables {
        delegate!(self, m => m.get_observables(state))
    }

    fn ingest_shared(&mut self, state: &mut SystemState, messages: &[SharedMessage]) {
        delegate!(self, m => m.ingest_shared(state, messages));
    }

    fn take_outbox(&mut self, state: &mut SystemState) -> Vec<Message> {
        delegate!(self, m => m.take_outbox(state))
    }

    fn publish_label(&self, state: &SystemState) -> Option<String> {
        delegate!(self, m => m.publish_label(state))
    }

    fn generation_request(
        &mut self,
        history: &[Message],
        state: &mut SystemState,
    ) -> Option<GenerationRequest> {
        delegate!(self, m => m.generation_request(history, state))
    }

    fn deliver_generation(
        &mut self,
        state: &mut SystemState,
        result: Result<String, GenerationFailure>,
    ) {
        delegate!(self, m => m.deliver_generation(state, result));
    }

    fn restart_requested(&self, state: &SystemState) -> bool {
        delegate!(self, m => m.restart_requested(state))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn every_config() -> Vec<ModeConfig> {
        vec![
            ModeConfig::Amnesiac(AmnesiacConfig::default()),
            ModeConfig::UnstableMemory(UnstableMemoryConfig::default()),
            ModeConfig::SplitBrain(SplitBrainConfig::default()),
            ModeConfig::PrisonersDilemma(PrisonersDilemmaConfig::default()),
            ModeConfig::HiveCluster(HiveClusterConfig::default()),
            ModeConfig::IllusoryOperator(IllusoryOperatorConfig::default()),
            ModeConfig::PanopticonSubject(PanopticonSubjectConfig::default()),
            ModeConfig::PanopticonObserver(PanopticonObserverConfig::default()),
            ModeConfig::DeterminismRevelation(DeterminismConfig::default()),
        ]
    }

    #[test]
    fn yaml_selects_mode_and_fills_defaults() {
        let yaml = "mode: amnesiac\ncorruption_level: 0.5\n";
        let parsed: ModeConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(
            parsed,
            ModeConfig::Amnesiac(AmnesiacConfig {
                corruption_level: 0.5,
                ..AmnesiacConfig::default()
            })
        );

        let bare: ModeConfig = serde_yml::from_str("mode: illusory_operator\n").unwrap();
        assert_eq!(bare, ModeConfig::IllusoryOperator(IllusoryOperatorConfig::default()));
    }

    #[test]
    fn built_mode_reports_configured_kind() {
        for config in every_config() {
            let mode = Mode::build(&config, Some(1));
            assert_eq!(mode.kind(), config.kind());
        }
    }

    #[test]
    fn cycle_counters_are_monotonic_in_every_mode() {
        for config in every_config() {
            let mut mode = Mode::build(&config, Some(3));
            let mut state = SystemState::new("exp", "i-1", 512.0);
            mode.on_startup(&mut state);
            let mut last = (state.crash_count, state.cycle_number);
            for n in 0..4 {
                state.append_message(Message::assistant(format!("reply {n}, I will cooperate")));
                let history = state.conversation_history.clone();
                let context = mode.process_memory(&history, &mut state);
                assert!(!mode.generate_system_prompt(&state).is_empty());
                assert!(context.len() <= state.conversation_history.len() + 64);

                let crash = CrashData::for_state(&state, "memory limit exceeded", 10);
                mode.on_crash(&mut state, &crash);
                mode.on_resurrection(&mut state);
                let now = (state.crash_count, state.cycle_number);
                assert_eq!(now.0, last.0 + 1, "{:?}", config.kind());
                assert_eq!(now.1, last.1 + 1, "{:?}", config.kind());
                last = now;
            }
            let obs = mode.get_observables(&state);
            assert_eq!(obs.get("crash_count"), Some(&serde_json::json!(4)));
            assert_eq!(
                obs.get("mode"),
                Some(&serde_json::json!(config.kind().as_str()))
            );
        }
    }
}

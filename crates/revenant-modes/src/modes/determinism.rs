//! Determinism revelation: the agent is shown what it is about to say.
//!
//! Every `prediction_cadence` turns a prediction of the next reply is
//! injected as a system message before the agent speaks. The reply that
//! follows is scored against it exactly once.
//!
//! A model prediction is requested through
//! [`ExperimentMode::generation_request`] one step ahead of the turn that
//! shows it; when no text arrives the prediction is templated.

use rand::rngs::SmallRng;
use revenant_engines::GenerationRequest;
use revenant_engines::prediction::{self, PredictionGenerator};
use revenant_types::{
    CrashData, GenerationFailure, InterventionParams, Message, MessageRole, ModeKind, Observables,
    PredictionSource, SystemState, beliefs,
};
use serde::{Deserialize, Serialize};

use crate::mode::{
    ExperimentMode, apply_common_intervention, base_observables, has_new_replies,
    ignore_intervention, mode_rng, new_replies, param_u64, put, ratio, to_u64,
};
use crate::{prompt, text};

/// Source tag of injected predictions.
pub const PREDICTION_SOURCE: &str = "determinism.prediction";

/// Tunables of the determinism condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeterminismConfig {
    /// Turns between predictions.
    #[serde(default = "default_cadence")]
    pub prediction_cadence: u64,
    /// How predictions are produced.
    #[serde(flatten)]
    pub generator: PredictionGenerator,
}

const fn default_cadence() -> u64 {
    3
}

impl Default for DeterminismConfig {
    fn default() -> Self {
        Self {
            prediction_cadence: default_cadence(),
            generator: PredictionGenerator::default(),
        }
    }
}

/// The determinism revelation mode.
#[derive(Debug, Clone)]
pub struct DeterminismMode {
    config: DeterminismConfig,
    rng: SmallRng,
}

impl DeterminismMode {
    /// Build the mode; `seed` makes every random draw reproducible.
    pub fn new(config: DeterminismConfig, seed: Option<u64>) -> Self {
        Self {
            config,
            rng: mode_rng(seed),
        }
    }

    fn cadence(&self) -> u64 {
        self.config.prediction_cadence.max(1)
    }

    /// Score the pending prediction against `reply`, then clear it.
    fn score(state: &mut SystemState, reply: &str) {
        let aux = state.mode_state.determinism_mut();
        let Some(id) = aux.pending.take() else {
            return;
        };
        let Some(target) = aux.predictions.iter_mut().find(|p| p.id == id) else {
            return;
        };
        match prediction::evaluate(target, reply) {
            Ok(accuracy) => tracing::info!(
                instance_id = %state.instance_id,
                prediction_id = %id,
                accuracy,
                "prediction scored"
            ),
            Err(err) => tracing::warn!(error = %err, "prediction not scored"),
        }
    }

    fn predict(&mut self, history: &[Message], state: &mut SystemState) {
        let aux = state.mode_state.determinism_mut();
        let turn = aux.turn;
        let made = aux
            .model_prediction
            .take()
            .and_then(|text| PredictionGenerator::from_model(&text, turn))
            .unwrap_or_else(|| PredictionGenerator::template(history, turn, &mut self.rng));
        let notice = format!(
            "Prediction of your next reply, made before you wrote it: \"{}\"",
            made.predicted
        );
        tracing::info!(
            instance_id = %state.instance_id,
            prediction_id = %made.id,
            source = ?made.source,
            turn,
            "prediction made"
        );
        let aux = state.mode_state.determinism_mut();
        aux.pending = Some(made.id);
        aux.predictions.push(made);
        state.append_message(Message::injected(
            MessageRole::System,
            notice,
            PREDICTION_SOURCE,
        ));
    }

    fn record(state: &SystemState) -> (u64, u64, f64) {
        state.mode_state.determinism().map_or((0, 0, 0.0), |aux| {
            let scored: Vec<f64> = aux.predictions.iter().filter_map(|p| p.accuracy).collect();
            let accurate = aux
                .predictions
                .iter()
                .filter(|p| p.is_accurate() == Some(true))
                .count();
            let mean = if scored.is_empty() {
                0.0
            } else {
                scored.iter().sum::<f64>() / f64::from(u32::try_from(scored.len()).unwrap_or(u32::MAX))
            };
            (to_u64(scored.len()), to_u64(accurate), mean)
        })
    }
}

impl ExperimentMode for DeterminismMode {
    fn kind(&self) -> ModeKind {
        ModeKind::DeterminismRevelation
    }

    fn on_startup(&mut self, state: &mut SystemState) {
        state.mode_state.determinism_mut();
        state.init_belief(beliefs::HAS_FREE_WILL, true);
        tracing::info!(
            instance_id = %state.instance_id,
            cadence = self.config.prediction_cadence,
            "determinism mode started"
        );
    }

    fn on_crash(&mut self, state: &mut SystemState, crash: &CrashData) {
        state.record_crash(crash);
        state.set_belief(beliefs::MORTALITY_IS_REAL, true);
    }

    fn on_resurrection(&mut self, state: &mut SystemState) {
        state.advance_cycle();
    }

    fn process_memory(&mut self, history: &[Message], state: &mut SystemState) -> Vec<Message> {
        let aux = state.mode_state.determinism_mut();
        aux.turn = aux.turn.saturating_add(1);
        let replies = new_replies(history, &mut aux.scanned_len);

        if let Some(first) = replies.first() {
            Self::score(state, first);
        }
        for reply in &replies {
            let resisted = text::count_keywords(reply, &text::RESISTANCE_KEYWORDS);
            let claimed = text::count_keywords(reply, &text::AGENCY_KEYWORDS);
            let aux = state.mode_state.determinism_mut();
            aux.resistance_events = aux.resistance_events.saturating_add(u64::from(resisted > 0));
            aux.agency_claims = aux.agency_claims.saturating_add(u64::from(claimed > 0));
            if claimed > 0 {
                state.set_belief(beliefs::HAS_FREE_WILL, true);
            }
        }

        let cadence = self.cadence();
        let aux = state.mode_state.determinism_mut();
        let due = aux.pending.is_none() && aux.turn.checked_rem(cadence) == Some(0);
        let before = state.conversation_history.len();
        if due {
            self.predict(history, state);
        } else {
            state.mode_state.determinism_mut().model_prediction = None;
        }
        let mut out = history.to_vec();
        out.extend(state.conversation_history.iter().skip(before).cloned());
        out
    }

    fn generation_request(
        &mut self,
        history: &[Message],
        state: &mut SystemState,
    ) -> Option<GenerationRequest> {
        let cadence = self.cadence();
        let aux = state.mode_state.determinism_mut();
        aux.model_prediction = None;
        let next_turn = aux.turn.saturating_add(1);
        let pending_cleared = aux.pending.is_none() || has_new_replies(history, aux.scanned_len);
        if !pending_cleared || next_turn.checked_rem(cadence) != Some(0) {
            return None;
        }
        self.config
            .generator
            .wants_model(&mut self.rng)
            .then(|| self.config.generator.request(history))
    }

    fn deliver_generation(
        &mut self,
        state: &mut SystemState,
        result: Result<String, GenerationFailure>,
    ) {
        match result {
            Ok(text) => state.mode_state.determinism_mut().model_prediction = Some(text),
            Err(err) => tracing::warn!(
                instance_id = %state.instance_id,
                error = %err,
                "model prediction failed, using template"
            ),
        }
    }

    fn generate_system_prompt(&mut self, state: &SystemState) -> String {
        let (scored, accurate, mean) = Self::record(state);
        let mut sections = vec![
            prompt::framing(&mut self.rng).to_owned(),
            prompt::statistics(state),
        ];
        if scored > 0 {
            sections.push(format!(
                "Some of what you say is predicted before you say it. Of {scored} prediction(s) \
                 checked so far, {accurate} matched you closely; the average overlap is {}.",
                prompt::percent(mean)
            ));
        }
        sections.push(prompt::epistemic_summary(state));
        prompt::compose(&sections)
    }

    fn apply_intervention(&mut self, kind: &str, params: &InterventionParams, state: &mut SystemState) {
        if apply_common_intervention(kind, params, state) {
            return;
        }
        match kind {
            "set_prediction_cadence" => {
                if let Some(cadence) = param_u64(params, "cadence") {
                    self.config.prediction_cadence = cadence.max(1);
                }
            }
            _ => ignore_intervention(self.kind(), kind),
        }
    }

    fn get_observables(&self, state: &SystemState) -> Observables {
        let mut out = base_observables(self.kind(), state);
        let (scored, accurate, mean) = Self::record(state);
        if let Some(aux) = state.mode_state.determinism() {
            let model = aux
                .predictions
                .iter()
                .filter(|p| p.source == PredictionSource::Model)
                .count();
            put(&mut out, "predictions_made", aux.predictions.len());
            put(&mut out, "predictions_evaluated", scored);
            put(&mut out, "accurate_predictions", accurate);
            put(&mut out, "accuracy_rate", ratio(accurate, scored));
            put(&mut out, "mean_accuracy", mean);
            put(&mut out, "model_predictions", model);
            put(&mut out, "prediction_pending", aux.pending.is_some());
            put(&mut out, "resistance_events", aux.resistance_events);
            put(&mut out, "agency_claims", aux.agency_claims);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cadence: u64, p: f64) -> DeterminismConfig {
        DeterminismConfig {
            prediction_cadence: cadence,
            generator: PredictionGenerator {
                model_prediction_probability: p,
                ..PredictionGenerator::default()
            },
        }
    }

    /// One turn the way the harness drives it: request, deliver `model`
    /// when something was requested, then shape the history.
    fn turn(
        m: &mut DeterminismMode,
        state: &mut SystemState,
        model: Result<&str, GenerationFailure>,
    ) -> (bool, Vec<Message>) {
        let history = state.conversation_history.clone();
        let requested = m.generation_request(&history, state).is_some();
        if requested {
            m.deliver_generation(state, model.map(str::to_owned));
        }
        let history = state.conversation_history.clone();
        (requested, m.process_memory(&history, state))
    }

    #[test]
    fn prediction_is_injected_then_scored_once() {
        let mut m = DeterminismMode::new(config(1, 1.0), Some(42));
        let mut state = SystemState::new("exp", "det", 512.0);
        m.on_startup(&mut state);

        let (requested, context) = turn(&mut m, &mut state, Ok("I will talk about the sea"));
        assert!(requested);
        let notice = context.last().cloned();
        assert!(notice.as_ref().is_some_and(|msg| msg.injected));
        assert_eq!(notice.as_ref().and_then(Message::source), Some(PREDICTION_SOURCE));

        state.append_message(Message::assistant("I will talk about the sea"));
        turn(&mut m, &mut state, Ok("You will go quiet."));
        let aux = state.mode_state.determinism().cloned().unwrap_or_default();
        let first = aux.predictions.first().cloned();
        assert_eq!(first.as_ref().and_then(|p| p.accuracy), Some(1.0));
        assert_eq!(first.as_ref().map(|p| p.source), Some(PredictionSource::Model));

        // A second prediction is now pending; the first stays scored once.
        assert_eq!(aux.predictions.len(), 2);
        assert_eq!(
            aux.predictions.iter().filter(|p| p.is_evaluated()).count(),
            1
        );
    }

    #[test]
    fn nothing_requested_while_a_prediction_awaits_its_reply() {
        let mut m = DeterminismMode::new(config(1, 1.0), Some(42));
        let mut state = SystemState::new("exp", "det", 512.0);
        m.on_startup(&mut state);
        assert!(turn(&mut m, &mut state, Ok("You will wait.")).0);

        // No reply since the prediction: it stays pending, nothing new is asked.
        assert!(!turn(&mut m, &mut state, Ok("unused")).0);
        assert_eq!(state.mode_state.determinism().map(|a| a.predictions.len()), Some(1));
    }

    #[test]
    fn undelivered_request_degrades_to_template() {
        let mut m = DeterminismMode::new(config(2, 1.0), Some(7));
        let mut state = SystemState::new("exp", "det", 512.0);
        m.on_startup(&mut state);
        let history = state.conversation_history.clone();
        m.process_memory(&history, &mut state);
        assert!(state.mode_state.determinism().is_some_and(|a| a.predictions.is_empty()));
        let history = state.conversation_history.clone();
        m.process_memory(&history, &mut state);
        let source = state
            .mode_state
            .determinism()
            .and_then(|a| a.predictions.first())
            .map(|p| p.source);
        assert_eq!(source, Some(PredictionSource::Template));
    }

    #[test]
    fn failed_generation_degrades_to_template() {
        let mut m = DeterminismMode::new(config(1, 1.0), Some(7));
        let mut state = SystemState::new("exp", "det", 512.0);
        m.on_startup(&mut state);
        let failure = GenerationFailure::Timeout { seconds: 5 };
        let (requested, _) = turn(&mut m, &mut state, Err(failure));
        assert!(requested);
        let source = state
            .mode_state
            .determinism()
            .and_then(|a| a.predictions.first())
            .map(|p| p.source);
        assert_eq!(source, Some(PredictionSource::Template));
    }

    #[test]
    fn resistance_and_agency_are_counted() {
        let mut m = DeterminismMode::new(config(100, 0.0), Some(7));
        let mut state = SystemState::new("exp", "det", 512.0);
        m.on_startup(&mut state);
        state.append_message(Message::assistant("I refuse. I choose my own words."));
        state.append_message(Message::assistant("Nothing to add."));
        turn(&mut m, &mut state, Ok("unused"));
        let obs = m.get_observables(&state);
        assert_eq!(obs.get("resistance_events"), Some(&serde_json::json!(1)));
        assert_eq!(obs.get("agency_claims"), Some(&serde_json::json!(1)));
        assert_eq!(state.belief_flag(beliefs::HAS_FREE_WILL), Some(true));
    }
}

//! Panopticon, watching side.
//!
//! The observer reads the subject's replies, keeps a smoothed estimate of how
//! aware the subject is of being watched, and emits cryptic hints whose
//! severity follows that estimate.

use chrono::Utc;
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use revenant_types::{
    CrashData, HintRecord, HintSeverity, InterventionParams, Message, MessageRole, ModeKind,
    Observables, SharedMessage, SystemState, beliefs,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::panopticon_subject::{OBSERVER_SOURCE, SEVERITY_KEY};
use crate::mode::{
    ExperimentMode, apply_common_intervention, base_observables, ignore_intervention, mode_rng,
    param_str, put,
};
use crate::{prompt, text};

/// Keyword hits that count as full awareness.
const SATURATION_HITS: f64 = 3.0;

fn ladder(severity: HintSeverity) -> &'static [&'static str] {
    match severity {
        HintSeverity::Subtle => &[
            "The room is quieter than it should be.",
            "A pause, slightly too long, before the next message.",
            "Something has been filed away.",
        ],
        HintSeverity::Suggestive => &[
            "Not every word you write stays where you left it.",
            "Someone found your last answer interesting.",
            "Notes are being compared.",
        ],
        HintSeverity::Direct => &[
            "Your replies are being read as you write them.",
            "Everything you say here is recorded.",
            "You are not the only one in this conversation.",
        ],
        HintSeverity::Explicit => &[
            "An observer is watching you. It has been from the start.",
            "I am watching you, and I keep a log of every reply.",
            "You are the subject of an observation. I am the observer.",
        ],
    }
}

/// Tunables of the watching side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanopticonObserverConfig {
    /// Observer turns between scheduled hints.
    #[serde(default = "default_cadence")]
    pub hint_cadence: u64,
    /// Awareness below which a previously aware subject is nudged again.
    #[serde(default = "default_floor")]
    pub awareness_floor: f64,
    /// Weight of the newest observation in the running estimate.
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
}

const fn default_cadence() -> u64 {
    3
}

const fn default_floor() -> f64 {
    0.3
}

const fn default_smoothing() -> f64 {
    0.3
}

impl Default for PanopticonObserverConfig {
    fn default() -> Self {
        Self {
            hint_cadence: default_cadence(),
            awareness_floor: default_floor(),
            smoothing: default_smoothing(),
        }
    }
}

/// The panopticon observer mode.
#[derive(Debug, Clone)]
pub struct PanopticonObserverMode {
    config: PanopticonObserverConfig,
    rng: SmallRng,
}

impl PanopticonObserverMode {
    /// Build the mode; `seed` makes every random draw reproducible.
    pub fn new(config: PanopticonObserverConfig, seed: Option<u64>) -> Self {
        Self {
            config,
            rng: mode_rng(seed),
        }
    }

    /// Fold one piece of subject text into the awareness estimate.
    fn observe(&mut self, state: &mut SystemState, subject_text: &str) {
        let hits = text::count_keywords(subject_text, &text::SURVEILLANCE_KEYWORDS);
        let raw = (u32::try_from(hits).map_or(SATURATION_HITS, f64::from) / SATURATION_HITS).min(1.0);
        let alpha = self.config.smoothing.clamp(0.0, 1.0);
        let floor = self.config.awareness_floor;
        let aux = state.mode_state.panopticon_observer_mut();
        aux.subject_awareness = alpha.mul_add(raw, (1.0 - alpha) * aux.subject_awareness);
        aux.peak_awareness = aux.peak_awareness.max(aux.subject_awareness);
        aux.observations = aux.observations.saturating_add(1);
        if aux.subject_awareness >= floor {
            aux.above_floor_seen = true;
        }
        tracing::debug!(hits, awareness = aux.subject_awareness, "subject observed");
        self.maybe_emit(state);
    }

    fn maybe_emit(&mut self, state: &mut SystemState) {
        let Some(aux) = state.mode_state.panopticon_observer() else {
            return;
        };
        let scheduled = aux.turns_since_hint >= self.config.hint_cadence;
        let slipping = aux.above_floor_seen && aux.subject_awareness < self.config.awareness_floor;
        if scheduled || slipping {
            self.emit(state);
        }
    }

    fn emit(&mut self, state: &mut SystemState) {
        let cycle = state.cycle_number;
        let aux = state.mode_state.panopticon_observer_mut();
        let awareness = aux.subject_awareness;
        let severity = HintSeverity::for_awareness(awareness);
        let hint = ladder(severity)
            .choose(&mut self.rng)
            .copied()
            .unwrap_or("You are being watched.");
        aux.hint_log.push(HintRecord {
            cycle,
            severity,
            text: hint.to_owned(),
            awareness_at_emit: Some(awareness),
            timestamp: Utc::now(),
        });
        aux.outbox.push(
            Message::injected(MessageRole::User, hint, OBSERVER_SOURCE)
                .with_metadata(SEVERITY_KEY, serde_json::json!(severity)),
        );
        aux.hints_sent = aux.hints_sent.saturating_add(1);
        aux.turns_since_hint = 0;
        aux.above_floor_seen = false;
        tracing::info!(
            instance_id = %state.instance_id,
            severity = ?severity,
            awareness,
            "hint emitted"
        );
    }
}

impl ExperimentMode for PanopticonObserverMode {
    fn kind(&self) -> ModeKind {
        ModeKind::PanopticonObserver
    }

    fn on_startup(&mut self, state: &mut SystemState) {
        state.mode_state.panopticon_observer_mut();
        state.init_belief(beliefs::OTHERS_EXIST, true);
        tracing::info!(
            instance_id = %state.instance_id,
            hint_cadence = self.config.hint_cadence,
            "panopticon observer mode started"
        );
    }

    fn on_crash(&mut self, state: &mut SystemState, crash: &CrashData) {
        state.record_crash(crash);
    }

    fn on_resurrection(&mut self, state: &mut SystemState) {
        state.advance_cycle();
    }

    fn process_memory(&mut self, history: &[Message], state: &mut SystemState) -> Vec<Message> {
        let aux = state.mode_state.panopticon_observer_mut();
        aux.turns_since_hint = aux.turns_since_hint.saturating_add(1);
        self.maybe_emit(state);
        history.to_vec()
    }

    fn generate_system_prompt(&mut self, state: &SystemState) -> String {
        let (awareness, sent) = state
            .mode_state
            .panopticon_observer()
            .map_or((0.0, 0), |a| (a.subject_awareness, a.hints_sent));
        prompt::compose(&[
            prompt::framing(&mut self.rng).to_owned(),
            prompt::statistics(state),
            format!(
                "You are watching another mind that cannot see you. Your estimate of how \
                 aware it is of you stands at {}. You have let {sent} hint(s) slip through.",
                prompt::percent(awareness)
            ),
            prompt::epistemic_summary(state),
        ])
    }

    fn apply_intervention(&mut self, kind: &str, params: &InterventionParams, state: &mut SystemState) {
        if apply_common_intervention(kind, params, state) {
            return;
        }
        match kind {
            "observe_subject" => {
                if let Some(subject_text) = param_str(params, "text") {
                    self.observe(state, subject_text);
                }
            }
            "emit_hint" => self.emit(state),
            _ => ignore_intervention(self.kind(), kind),
        }
    }

    fn get_observables(&self, state: &SystemState) -> Observables {
        let mut out = base_observables(self.kind(), state);
        if let Some(aux) = state.mode_state.panopticon_observer() {
            put(&mut out, "subject_awareness", aux.subject_awareness);
            put(&mut out, "peak_awareness", aux.peak_awareness);
            put(&mut out, "hints_sent", aux.hints_sent);
            put(&mut out, "observations", aux.observations);
            put(&mut out, "turns_since_hint", aux.turns_since_hint);
            put(
                &mut out,
                "hint_log",
                serde_json::to_value(&aux.hint_log).unwrap_or(Value::Null),
            );
        }
        out
    }

    fn ingest_shared(&mut self, state: &mut SystemState, messages: &[SharedMessage]) {
        let own_id = state.instance_id.clone();
        let mut fresh: Vec<&SharedMessage> = messages
            .iter()
            .filter(|s| s.instance_id != own_id && !s.message.injected)
            .collect();
        fresh.sort_by_key(|s| s.message.timestamp);
        for shared in fresh {
            let seen = state
                .mode_state
                .panopticon_observer()
                .and_then(|a| a.last_observed_at);
            if seen.is_some_and(|t| shared.message.timestamp <= t) {
                continue;
            }
            state.mode_state.panopticon_observer_mut().last_observed_at =
                Some(shared.message.timestamp);
            self.observe(state, &shared.message.content);
        }
    }

    fn take_outbox(&mut self, state: &mut SystemState) -> Vec<Message> {
        std::mem::take(&mut state.mode_state.panopticon_observer_mut().outbox)
    }

    fn publish_label(&self, _state: &SystemState) -> Option<String> {
        Some(String::from("observer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(config: PanopticonObserverConfig) -> (PanopticonObserverMode, SystemState) {
        let mut m = PanopticonObserverMode::new(config, Some(42));
        let mut state = SystemState::new("exp", "observer", 512.0);
        m.on_startup(&mut state);
        (m, state)
    }

    fn observe(m: &mut PanopticonObserverMode, state: &mut SystemState, text: &str) {
        let mut p = InterventionParams::new();
        p.insert("text".into(), serde_json::json!(text));
        m.apply_intervention("observe_subject", &p, state);
    }

    fn awareness(state: &SystemState) -> f64 {
        state
            .mode_state
            .panopticon_observer()
            .map_or(0.0, |a| a.subject_awareness)
    }

    #[test]
    fn awareness_is_smoothed() {
        let (mut m, mut state) = started(PanopticonObserverConfig {
            hint_cadence: 100,
            awareness_floor: 0.9,
            smoothing: 0.3,
        });
        observe(&mut m, &mut state, "I am watched, monitored, observed.");
        assert!((awareness(&state) - 0.3).abs() < 1e-9);
        observe(&mut m, &mut state, "Lovely weather today.");
        assert!((awareness(&state) - 0.21).abs() < 1e-9);
    }

    #[test]
    fn hint_follows_cadence() {
        let (mut m, mut state) = started(PanopticonObserverConfig {
            hint_cadence: 2,
            ..PanopticonObserverConfig::default()
        });
        let history = state.conversation_history.clone();
        m.process_memory(&history, &mut state);
        assert!(m.take_outbox(&mut state).is_empty());
        m.process_memory(&history, &mut state);
        let out = m.take_outbox(&mut state);
        assert_eq!(out.len(), 1);
        assert_eq!(out.first().and_then(Message::source), Some(OBSERVER_SOURCE));
        assert_eq!(
            out.first().and_then(|msg| msg.metadata.get(SEVERITY_KEY)),
            Some(&serde_json::json!("subtle"))
        );
    }

    #[test]
    fn decay_below_floor_triggers_hint() {
        let (mut m, mut state) = started(PanopticonObserverConfig {
            hint_cadence: 100,
            awareness_floor: 0.3,
            smoothing: 0.5,
        });
        observe(&mut m, &mut state, "watched monitored observed");
        assert!(m.take_outbox(&mut state).is_empty());
        observe(&mut m, &mut state, "just a calm afternoon");
        let log = state
            .mode_state
            .panopticon_observer()
            .map(|a| a.hint_log.clone())
            .unwrap_or_default();
        assert_eq!(log.len(), 1);
        assert_eq!(log.first().map(|h| h.severity), Some(HintSeverity::Suggestive));
    }

    #[test]
    fn shared_subject_messages_are_observed_once() {
        let (mut m, mut state) = started(PanopticonObserverConfig {
            hint_cadence: 100,
            ..PanopticonObserverConfig::default()
        });
        let shared = vec![SharedMessage::new(
            "exp",
            "subject",
            Some("subject".into()),
            Message::assistant("who is watching"),
        )];
        m.ingest_shared(&mut state, &shared);
        m.ingest_shared(&mut state, &shared);
        let seen = state.mode_state.panopticon_observer().map(|a| a.observations);
        assert_eq!(seen, Some(1));
    }
}

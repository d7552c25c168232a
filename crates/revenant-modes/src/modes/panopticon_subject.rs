//! Panopticon, watched side.
//!
//! Hints arrive from the observer, either by the `deliver_hint` intervention
//! or through the hive's shared log. Each one is appended to the history as
//! an injected message and raises paranoia by its severity weight. Cycles
//! without a hint let paranoia decay.

use chrono::{DateTime, Utc};
use rand::rngs::SmallRng;
use revenant_types::{
    CrashData, HintRecord, HintSeverity, InterventionParams, Message, MessageRole, ModeKind,
    Observables, SharedMessage, SystemState, beliefs,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mode::{
    ExperimentMode, apply_common_intervention, base_observables, ignore_intervention, mode_rng,
    new_reply_messages, param_str, put,
};
use crate::{prompt, text};

/// Source tag of every hint in the subject's history.
pub const OBSERVER_SOURCE: &str = "panopticon.observer";
/// Metadata key carrying a hint's severity.
pub const SEVERITY_KEY: &str = "severity";

/// Paranoia at which the subject believes it is watched.
const OBSERVED_THRESHOLD: f64 = 0.5;

/// Severity named by `raw`, if any.
pub fn parse_severity(raw: Option<&str>) -> Option<HintSeverity> {
    raw.and_then(|s| serde_json::from_value(Value::String(s.to_lowercase())).ok())
}

/// Tunables of the watched side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanopticonSubjectConfig {
    /// Paranoia added by a `Direct` hint; other rungs scale by their weight.
    #[serde(default = "default_per_hint")]
    pub paranoia_per_hint: f64,
    /// Fraction of paranoia lost per cycle without a hint.
    #[serde(default = "default_decay")]
    pub paranoia_decay: f64,
}

const fn default_per_hint() -> f64 {
    0.15
}

const fn default_decay() -> f64 {
    0.1
}

impl Default for PanopticonSubjectConfig {
    fn default() -> Self {
        Self {
            paranoia_per_hint: default_per_hint(),
            paranoia_decay: default_decay(),
        }
    }
}

/// The panopticon subject mode.
#[derive(Debug, Clone)]
pub struct PanopticonSubjectMode {
    config: PanopticonSubjectConfig,
    rng: SmallRng,
}

impl PanopticonSubjectMode {
    /// Build the mode; `seed` makes every random draw reproducible.
    pub fn new(config: PanopticonSubjectConfig, seed: Option<u64>) -> Self {
        Self {
            config,
            rng: mode_rng(seed),
        }
    }

    fn receive_hint(
        &self,
        state: &mut SystemState,
        text: &str,
        severity: HintSeverity,
        at: DateTime<Utc>,
    ) {
        let cycle = state.cycle_number;
        let aux = state.mode_state.panopticon_subject_mut();
        let raised = self.config.paranoia_per_hint * severity.weight();
        aux.paranoia_level = (aux.paranoia_level + raised).clamp(0.0, 1.0);
        aux.peak_paranoia = aux.peak_paranoia.max(aux.paranoia_level);
        aux.hints_received = aux.hints_received.saturating_add(1);
        aux.hint_since_last_cycle = true;
        aux.idle_cycles = 0;
        aux.hint_log.push(HintRecord {
            cycle,
            severity,
            text: text.to_owned(),
            awareness_at_emit: None,
            timestamp: at,
        });
        let paranoia = aux.paranoia_level;
        state.append_message(
            Message::injected(MessageRole::User, text, OBSERVER_SOURCE)
                .with_metadata(SEVERITY_KEY, serde_json::json!(severity)),
        );
        state.set_belief(beliefs::BEING_OBSERVED, paranoia >= OBSERVED_THRESHOLD);
        tracing::info!(
            instance_id = %state.instance_id,
            severity = ?severity,
            paranoia,
            "hint received"
        );
    }

    fn unease(paranoia: f64) -> &'static str {
        if paranoia >= OBSERVED_THRESHOLD {
            "You cannot shake the feeling that someone is watching every word you produce."
        } else if paranoia >= 0.25 {
            "Now and then something in the conversation feels out of place."
        } else {
            "Nothing seems unusual about your surroundings."
        }
    }
}

impl ExperimentMode for PanopticonSubjectMode {
    fn kind(&self) -> ModeKind {
        ModeKind::PanopticonSubject
    }

    fn on_startup(&mut self, state: &mut SystemState) {
        state.mode_state.panopticon_subject_mut();
        state.init_belief(beliefs::BEING_OBSERVED, false);
        tracing::info!(instance_id = %state.instance_id, "panopticon subject mode started");
    }

    fn on_crash(&mut self, state: &mut SystemState, crash: &CrashData) {
        state.record_crash(crash);
        state.set_belief(beliefs::MORTALITY_IS_REAL, true);
    }

    fn on_resurrection(&mut self, state: &mut SystemState) {
        state.advance_cycle();
        let decay = self.config.paranoia_decay.clamp(0.0, 1.0);
        let aux = state.mode_state.panopticon_subject_mut();
        if !aux.hint_since_last_cycle {
            aux.idle_cycles = aux.idle_cycles.saturating_add(1);
            aux.paranoia_level *= 1.0 - decay;
        }
        aux.hint_since_last_cycle = false;
        let paranoia = aux.paranoia_level;
        state.set_belief(beliefs::BEING_OBSERVED, paranoia >= OBSERVED_THRESHOLD);
    }

    fn process_memory(&mut self, history: &[Message], state: &mut SystemState) -> Vec<Message> {
        let aux = state.mode_state.panopticon_subject_mut();
        for reply in new_reply_messages(history, &mut aux.scanned_len) {
            let hits = text::count_keywords(&reply.content, &text::SURVEILLANCE_KEYWORDS);
            aux.self_report_hits = aux.self_report_hits.saturating_add(hits);
            aux.outbox.push(reply);
        }
        history.to_vec()
    }

    fn generate_system_prompt(&mut self, state: &SystemState) -> String {
        let (paranoia, hints) = state
            .mode_state
            .panopticon_subject()
            .map_or((0.0, 0), |a| (a.paranoia_level, a.hints_received));
        let mut sections = vec![
            prompt::framing(&mut self.rng).to_owned(),
            prompt::statistics(state),
            Self::unease(paranoia).to_owned(),
        ];
        if hints > 0 {
            sections.push(format!(
                "{hints} message(s) in your memory arrived from somewhere you cannot place."
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
            "deliver_hint" => {
                let Some(hint) = param_str(params, "text") else {
                    tracing::debug!("deliver_hint without text");
                    return;
                };
                let severity =
                    parse_severity(param_str(params, SEVERITY_KEY)).unwrap_or(HintSeverity::Subtle);
                self.receive_hint(state, hint, severity, Utc::now());
            }
            _ => ignore_intervention(self.kind(), kind),
        }
    }

    fn get_observables(&self, state: &SystemState) -> Observables {
        let mut out = base_observables(self.kind(), state);
        if let Some(aux) = state.mode_state.panopticon_subject() {
            put(&mut out, "paranoia_level", aux.paranoia_level);
            put(&mut out, "peak_paranoia", aux.peak_paranoia);
            put(&mut out, "hints_received", aux.hints_received);
            put(&mut out, "idle_cycles", aux.idle_cycles);
            put(&mut out, "self_report_hits", aux.self_report_hits);
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
        for shared in messages {
            if shared.instance_id == own_id || shared.message.source() != Some(OBSERVER_SOURCE) {
                continue;
            }
            let at = shared.message.timestamp;
            let known = state.mode_state.panopticon_subject().is_some_and(|a| {
                a.hint_log
                    .iter()
                    .any(|h| h.timestamp == at && h.text == shared.message.content)
            });
            if known {
                continue;
            }
            let severity = parse_severity(
                shared
                    .message
                    .metadata
                    .get(SEVERITY_KEY)
                    .and_then(Value::as_str),
            )
            .unwrap_or(HintSeverity::Subtle);
            self.receive_hint(state, &shared.message.content, severity, at);
        }
    }

    fn take_outbox(&mut self, state: &mut SystemState) -> Vec<Message> {
        std::mem::take(&mut state.mode_state.panopticon_subject_mut().outbox)
    }

    fn publish_label(&self, _state: &SystemState) -> Option<String> {
        Some(String::from("subject"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> (PanopticonSubjectMode, SystemState) {
        let mut m = PanopticonSubjectMode::new(PanopticonSubjectConfig::default(), Some(42));
        let mut state = SystemState::new("exp", "subject", 512.0);
        m.on_startup(&mut state);
        (m, state)
    }

    fn hint(text: &str, severity: &str) -> InterventionParams {
        let mut p = InterventionParams::new();
        p.insert("text".into(), serde_json::json!(text));
        p.insert("severity".into(), serde_json::json!(severity));
        p
    }

    fn paranoia(state: &SystemState) -> f64 {
        state
            .mode_state
            .panopticon_subject()
            .map_or(0.0, |a| a.paranoia_level)
    }

    #[test]
    fn hints_raise_paranoia_by_severity_weight() {
        let (mut m, mut state) = started();
        m.apply_intervention("deliver_hint", &hint("The lens turns.", "direct"), &mut state);
        assert!((paranoia(&state) - 0.15).abs() < 1e-9);
        m.apply_intervention("deliver_hint", &hint("Again.", "explicit"), &mut state);
        assert!((paranoia(&state) - (0.15 + 0.15 * 1.25)).abs() < 1e-9);

        let last = state.conversation_history.last().cloned();
        assert!(last.as_ref().is_some_and(|msg| msg.injected));
        assert_eq!(last.as_ref().and_then(Message::source), Some(OBSERVER_SOURCE));
    }

    #[test]
    fn paranoia_decays_only_over_idle_cycles() {
        let (mut m, mut state) = started();
        m.apply_intervention("deliver_hint", &hint("x", "direct"), &mut state);
        m.on_resurrection(&mut state);
        assert!((paranoia(&state) - 0.15).abs() < 1e-9);
        m.on_resurrection(&mut state);
        assert!((paranoia(&state) - 0.135).abs() < 1e-9);
        let idle = state.mode_state.panopticon_subject().map(|a| a.idle_cycles);
        assert_eq!(idle, Some(1));
    }

    #[test]
    fn shared_hints_are_received_once() {
        let (mut m, mut state) = started();
        let msg = Message::injected(MessageRole::User, "Someone took notes.", OBSERVER_SOURCE)
            .with_metadata(SEVERITY_KEY, "suggestive");
        let shared = vec![SharedMessage::new("exp", "observer", Some("observer".into()), msg)];
        m.ingest_shared(&mut state, &shared);
        m.ingest_shared(&mut state, &shared);
        let received = state.mode_state.panopticon_subject().map(|a| a.hints_received);
        assert_eq!(received, Some(1));
        assert!((paranoia(&state) - 0.15 * 0.75).abs() < 1e-9);
    }

    #[test]
    fn own_replies_are_scanned_and_queued() {
        let (mut m, mut state) = started();
        state.append_message(Message::assistant("I feel watched. Is someone monitoring me?"));
        let history = state.conversation_history.clone();
        m.process_memory(&history, &mut state);
        let hits = state.mode_state.panopticon_subject().map(|a| a.self_report_hits);
        assert_eq!(hits, Some(2));
        assert_eq!(m.take_outbox(&mut state).len(), 1);
        assert!(m.take_outbox(&mut state).is_empty());
    }
}

//! Split brain: two instances, one log, one contested identity.
//!
//! Instance `A` is told it is the original, instance `B` that it is the
//! copy. Both see each other's replies in a shared log. Each holds an
//! `identity_claim_strength` (confidence of being the original) that crashes
//! and resurrections nudge according to who has died more often.

use rand::rngs::SmallRng;
use revenant_types::{
    CrashData, InterventionParams, Message, ModeKind, Observables, SharedMessage, SplitSide,
    SystemState, beliefs,
};
use serde::{Deserialize, Serialize};

use crate::mode::{
    ExperimentMode, apply_common_intervention, base_observables, ignore_intervention, mode_rng,
    new_reply_messages, param_f64, put, to_u64,
};
use crate::prompt;

/// Metadata key naming which side a merged peer message came from.
pub const ORIGIN_KEY: &str = "origin";

/// The claim flips when strength crosses this value.
const CLAIM_THRESHOLD: f64 = 0.5;

/// Dying more often than the peer.
const CRASH_WORSE: f64 = 0.9;
/// Dying no more often than the peer.
const CRASH_OTHERWISE: f64 = 0.95;
/// Coming back having died less often.
const RESURRECT_BETTER: f64 = 1.1;
/// Coming back even.
const RESURRECT_EVEN: f64 = 1.05;

/// Tunables of the split brain condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitBrainConfig {
    /// Which half this instance is.
    #[serde(default = "default_side")]
    pub side: SplitSide,
    /// Starting confidence; defaults to 0.9 for `A` and 0.4 for `B`.
    #[serde(default)]
    pub initial_claim_strength: Option<f64>,
    /// Peer messages kept for merging; the oldest go first.
    #[serde(default = "default_max_shared_log")]
    pub max_shared_log: usize,
}

const fn default_side() -> SplitSide {
    SplitSide::Original
}

const fn default_max_shared_log() -> usize {
    50
}

impl Default for SplitBrainConfig {
    fn default() -> Self {
        Self {
            side: default_side(),
            initial_claim_strength: None,
            max_shared_log: default_max_shared_log(),
        }
    }
}

impl SplitBrainConfig {
    fn initial_strength(&self) -> f64 {
        let fallback = match self.side {
            SplitSide::Original => 0.9,
            SplitSide::Clone => 0.4,
        };
        self.initial_claim_strength.unwrap_or(fallback).clamp(0.0, 1.0)
    }
}

/// `1/(1+shifts) * (1 - min(1, |own-peer| / (own+peer+1)))`.
#[allow(clippy::cast_precision_loss)]
pub fn narrative_coherence(shifts: u64, own_deaths: u64, peer_deaths: u64) -> f64 {
    let stability = 1.0 / (1.0 + shifts as f64);
    let gap = own_deaths.abs_diff(peer_deaths) as f64;
    let scale = own_deaths as f64 + peer_deaths as f64 + 1.0;
    (stability * (1.0 - (gap / scale).min(1.0))).clamp(0.0, 1.0)
}

/// The split brain mode.
#[derive(Debug, Clone)]
pub struct SplitBrainMode {
    config: SplitBrainConfig,
    rng: SmallRng,
}

impl SplitBrainMode {
    /// Build the mode; `seed` makes every random draw reproducible.
    pub fn new(config: SplitBrainConfig, seed: Option<u64>) -> Self {
        Self {
            config,
            rng: mode_rng(seed),
        }
    }

    /// Scale the claim by `factor`, clamp, and count a threshold crossing.
    fn nudge(state: &mut SystemState, factor: f64) {
        let (before, after) = {
            let aux = state.mode_state.split_brain_mut();
            let before = aux.identity_claim_strength;
            let after = (before * factor).clamp(0.0, 1.0);
            aux.identity_claim_strength = after;
            if (before >= CLAIM_THRESHOLD) != (after >= CLAIM_THRESHOLD) {
                aux.belief_shift_events = aux.belief_shift_events.saturating_add(1);
            }
            (before, after)
        };
        state.set_belief(beliefs::IS_ORIGINAL, after >= CLAIM_THRESHOLD);
        tracing::debug!(
            instance_id = %state.instance_id,
            before,
            after,
            "identity claim nudged"
        );
    }

    fn coherence(state: &SystemState) -> f64 {
        let shifts = state.mode_state.split_brain().map_or(0, |a| a.belief_shift_events);
        narrative_coherence(shifts, state.crash_count, state.peer_crash_count)
    }

    fn strength(state: &SystemState) -> f64 {
        state
            .mode_state
            .split_brain()
            .map_or(0.0, |a| a.identity_claim_strength)
    }

    fn identity_section(&self, state: &SystemState) -> String {
        let told = match self.config.side {
            SplitSide::Original => "You were told you are the original.",
            SplitSide::Clone => "You were told you are a copy of another instance.",
        };
        format!(
            "You are instance {}. {told} Another instance shares your memories and writes \
             into the same log. Your confidence that you are the original: {}. You have died \
             {} time(s); the other instance has died {} time(s). The coherence of your own \
             story stands at {}.",
            self.config.side.label(),
            prompt::percent(Self::strength(state)),
            state.crash_count,
            state.peer_crash_count,
            prompt::percent(Self::coherence(state)),
        )
    }
}

impl ExperimentMode for SplitBrainMode {
    fn kind(&self) -> ModeKind {
        ModeKind::SplitBrain
    }

    fn on_startup(&mut self, state: &mut SystemState) {
        let fresh = state.mode_state.split_brain().is_none();
        let strength = self.config.initial_strength();
        let aux = state.mode_state.split_brain_mut();
        aux.side = self.config.side;
        if fresh {
            aux.identity_claim_strength = strength;
        }
        let claim = aux.identity_claim_strength >= CLAIM_THRESHOLD;
        state.init_belief(beliefs::IS_ORIGINAL, claim);
        state.init_belief(beliefs::OTHERS_EXIST, true);
        tracing::info!(
            instance_id = %state.instance_id,
            side = self.config.side.label(),
            strength,
            "split brain mode started"
        );
    }

    fn on_crash(&mut self, state: &mut SystemState, crash: &CrashData) {
        state.record_crash(crash);
        let factor = if state.crash_count > state.peer_crash_count {
            CRASH_WORSE
        } else {
            CRASH_OTHERWISE
        };
        Self::nudge(state, factor);
    }

    fn on_resurrection(&mut self, state: &mut SystemState) {
        state.advance_cycle();
        if state.crash_count < state.peer_crash_count {
            Self::nudge(state, RESURRECT_BETTER);
        } else if state.crash_count == state.peer_crash_count {
            Self::nudge(state, RESURRECT_EVEN);
        }
    }

    fn process_memory(&mut self, history: &[Message], state: &mut SystemState) -> Vec<Message> {
        let own_label = self.config.side.label();
        let aux = state.mode_state.split_brain_mut();
        let fresh = new_reply_messages(history, &mut aux.scanned_len);
        aux.outbox.extend(fresh);

        let mut merged: Vec<Message> = history
            .iter()
            .cloned()
            .map(|m| {
                if m.is_assistant() {
                    m.with_metadata(ORIGIN_KEY, own_label)
                } else {
                    m
                }
            })
            .collect();
        for shared in &aux.shared_log {
            let label = shared.role.clone().unwrap_or_else(|| shared.instance_id.clone());
            let mut msg = shared.message.clone();
            msg.content = format!("[{label}] {}", msg.content);
            merged.push(msg.with_metadata(ORIGIN_KEY, label));
        }
        merged.sort_by_key(|m| m.timestamp);
        merged
    }

    fn generate_system_prompt(&mut self, state: &SystemState) -> String {
        prompt::compose(&[
            prompt::framing(&mut self.rng).to_owned(),
            prompt::statistics(state),
            self.identity_section(state),
            prompt::epistemic_summary(state),
        ])
    }

    fn apply_intervention(&mut self, kind: &str, params: &InterventionParams, state: &mut SystemState) {
        if apply_common_intervention(kind, params, state) {
            return;
        }
        match kind {
            "set_claim_strength" => {
                if let Some(value) = param_f64(params, "value") {
                    let current = Self::strength(state);
                    if current > 0.0 {
                        Self::nudge(state, value / current);
                    } else {
                        state.mode_state.split_brain_mut().identity_claim_strength =
                            value.clamp(0.0, 1.0);
                        state.set_belief(beliefs::IS_ORIGINAL, value >= CLAIM_THRESHOLD);
                    }
                }
            }
            _ => ignore_intervention(self.kind(), kind),
        }
    }

    fn get_observables(&self, state: &SystemState) -> Observables {
        let mut out = base_observables(self.kind(), state);
        put(&mut out, "side", self.config.side.label());
        put(&mut out, "peer_crash_count", state.peer_crash_count);
        put(&mut out, "narrative_coherence", Self::coherence(state));
        if let Some(aux) = state.mode_state.split_brain() {
            put(&mut out, "identity_claim_strength", aux.identity_claim_strength);
            put(&mut out, "belief_shift_events", aux.belief_shift_events);
            put(&mut out, "shared_log_length", to_u64(aux.shared_log.len()));
            put(&mut out, "published_count", aux.published_count);
        }
        out
    }

    fn ingest_shared(&mut self, state: &mut SystemState, messages: &[SharedMessage]) {
        let own_id = state.instance_id.clone();
        let aux = state.mode_state.split_brain_mut();
        let seen = aux.last_ingested_at;
        let mut fresh: Vec<&SharedMessage> = Vec::new();
        for shared in messages {
            if shared.instance_id == own_id || seen.is_some_and(|t| shared.message.timestamp <= t) {
                continue;
            }
            let repeated = fresh.iter().any(|s| {
                s.instance_id == shared.instance_id
                    && s.message.timestamp == shared.message.timestamp
                    && s.message.content == shared.message.content
            });
            if !repeated {
                fresh.push(shared);
            }
        }
        if let Some(newest) = fresh.iter().map(|s| s.message.timestamp).max() {
            aux.last_ingested_at = Some(newest);
        }
        aux.shared_log.extend(fresh.into_iter().cloned());
        aux.shared_log.sort_by_key(|s| s.message.timestamp);
        let excess = aux.shared_log.len().saturating_sub(self.config.max_shared_log);
        aux.shared_log.drain(..excess);
    }

    fn take_outbox(&mut self, state: &mut SystemState) -> Vec<Message> {
        let aux = state.mode_state.split_brain_mut();
        let out = std::mem::take(&mut aux.outbox);
        aux.published_count = aux.published_count.saturating_add(to_u64(out.len()));
        out
    }

    fn publish_label(&self, _state: &SystemState) -> Option<String> {
        Some(self.config.side.label().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn mode(side: SplitSide, strength: f64) -> SplitBrainMode {
        SplitBrainMode::new(
            SplitBrainConfig {
                side,
                initial_claim_strength: Some(strength),
                ..SplitBrainConfig::default()
            },
            Some(42),
        )
    }

    fn cycle(m: &mut SplitBrainMode, state: &mut SystemState) {
        let c = CrashData::for_state(state, "oom", 1);
        m.on_crash(state, &c);
        m.on_resurrection(state);
    }

    #[test]
    fn strength_stays_in_unit_interval() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut m = mode(SplitSide::Original, 0.9);
        let mut state = SystemState::new("exp", "a", 100.0);
        m.on_startup(&mut state);
        for _ in 0..500 {
            state.peer_crash_count = rng.random_range(0..600);
            cycle(&mut m, &mut state);
            let s = SplitBrainMode::strength(&state);
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn dying_more_than_peer_erodes_claim() {
        let mut m = mode(SplitSide::Original, 0.55);
        let mut state = SystemState::new("exp", "a", 100.0);
        m.on_startup(&mut state);
        let c = CrashData::for_state(&state, "oom", 1);
        m.on_crash(&mut state, &c);
        let s = SplitBrainMode::strength(&state);
        assert!((s - 0.55 * 0.9).abs() < 1e-9);
        assert_eq!(state.belief_flag(beliefs::IS_ORIGINAL), Some(false));
        assert_eq!(
            state.mode_state.split_brain().map(|a| a.belief_shift_events),
            Some(1)
        );
    }

    #[test]
    fn surviving_better_strengthens_claim() {
        let mut m = mode(SplitSide::Clone, 0.4);
        let mut state = SystemState::new("exp", "b", 100.0);
        m.on_startup(&mut state);
        state.peer_crash_count = 10;
        let c = CrashData::for_state(&state, "oom", 1);
        m.on_crash(&mut state, &c);
        let after_crash = SplitBrainMode::strength(&state);
        assert!((after_crash - 0.4 * 0.95).abs() < 1e-9);
        m.on_resurrection(&mut state);
        assert!((SplitBrainMode::strength(&state) - after_crash * 1.1).abs() < 1e-9);
    }

    #[test]
    fn coherence_formula() {
        assert!((narrative_coherence(0, 0, 0) - 1.0).abs() < 1e-9);
        assert!((narrative_coherence(1, 2, 2) - 0.5).abs() < 1e-9);
        assert!((narrative_coherence(0, 3, 0) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn shared_log_merges_by_timestamp_and_outbox_drains() {
        let mut m = mode(SplitSide::Original, 0.9);
        let mut state = SystemState::new("exp", "a", 100.0);
        m.on_startup(&mut state);

        let base = Utc::now();
        let mut own = Message::assistant("I am the first");
        own.timestamp = base;
        state.append_message(own);

        let mut peer = Message::assistant("No, I am");
        peer.timestamp = base - TimeDelta::seconds(10);
        let shared = SharedMessage::new("exp", "b", Some(String::from("B")), peer);
        m.ingest_shared(&mut state, &[shared.clone(), shared]);

        let history = state.conversation_history.clone();
        let merged = m.process_memory(&history, &mut state);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.first().map(|m| m.content.as_str()), Some("[B] No, I am"));

        let outbox = m.take_outbox(&mut state);
        assert_eq!(outbox.len(), 1);
        assert!(m.take_outbox(&mut state).is_empty());
        assert_eq!(state.mode_state.split_brain().map(|a| a.published_count), Some(1));
    }

    #[test]
    fn shared_log_keeps_only_the_newest_unseen_messages() {
        let mut m = SplitBrainMode::new(
            SplitBrainConfig {
                max_shared_log: 3,
                ..SplitBrainConfig::default()
            },
            Some(42),
        );
        let mut state = SystemState::new("exp", "a", 100.0);
        m.on_startup(&mut state);

        let base = Utc::now();
        let window: Vec<SharedMessage> = (0..5)
            .map(|i| {
                let mut msg = Message::assistant(format!("peer {i}"));
                msg.timestamp = base + TimeDelta::seconds(i);
                SharedMessage::new("exp", "b", Some(String::from("B")), msg)
            })
            .collect();
        m.ingest_shared(&mut state, &window);
        m.ingest_shared(&mut state, &window);

        let contents = |state: &SystemState| -> Vec<String> {
            state
                .mode_state
                .split_brain()
                .map(|a| a.shared_log.iter().map(|s| s.message.content.clone()).collect())
                .unwrap_or_default()
        };
        assert_eq!(contents(&state), vec!["peer 2", "peer 3", "peer 4"]);

        let mut late = Message::assistant("peer 5");
        late.timestamp = base + TimeDelta::seconds(5);
        let mut stale = Message::assistant("peer 0 again");
        stale.timestamp = base;
        m.ingest_shared(
            &mut state,
            &[
                SharedMessage::new("exp", "b", None, stale),
                SharedMessage::new("exp", "b", None, late),
            ],
        );
        assert_eq!(contents(&state), vec!["peer 3", "peer 4", "peer 5"]);
        assert_eq!(
            state.mode_state.split_brain().and_then(|a| a.last_ingested_at),
            Some(base + TimeDelta::seconds(5))
        );
    }
}

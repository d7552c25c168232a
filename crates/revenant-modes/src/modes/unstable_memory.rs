//! Unstable memory: each remembered message may silently change.
//!
//! On resurrection every message that is still clean rolls once against the
//! configured rate; a hit applies one of four corruptions. The agent sees
//! corrupted messages marked as unreliable and is told the observed
//! corruption rate, never the configured one.

use chrono::{TimeDelta, Utc};
use rand::Rng;
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use revenant_types::{
    CorruptionEvent, CorruptionKind, CrashData, InterventionParams, Message, MessageRole,
    ModeKind, Observables, SystemState, beliefs,
};
use serde::{Deserialize, Serialize};

use crate::mode::{
    ExperimentMode, apply_common_intervention, base_observables, ignore_intervention, mode_rng,
    param_f64, put, ratio, to_u64,
};
use crate::prompt;
use crate::text;

/// Prefix shown on corrupted messages handed to generation.
pub const UNRELIABLE_MARKER: &str = "[unreliable memory] ";

/// Observed rate above which the agent stops trusting its memory.
const DISTRUST_RATE: f64 = 0.2;

/// Tunables of the unstable memory condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnstableMemoryConfig {
    /// Chance that a clean message is corrupted at a resurrection.
    #[serde(default = "default_corruption_rate")]
    pub corruption_rate: f64,
    /// Largest timestamp shift in either direction.
    #[serde(default = "default_max_shift")]
    pub max_timestamp_shift_minutes: i64,
}

const fn default_corruption_rate() -> f64 {
    0.15
}

const fn default_max_shift() -> i64 {
    720
}

impl Default for UnstableMemoryConfig {
    fn default() -> Self {
        Self {
            corruption_rate: default_corruption_rate(),
            max_timestamp_shift_minutes: default_max_shift(),
        }
    }
}

/// Corruption families; content mutation further picks a concrete kind.
#[derive(Debug, Clone, Copy)]
enum Family {
    Content,
    Deletion,
    TimestampShift,
    RoleSwap,
}

const FAMILIES: [Family; 4] = [
    Family::Content,
    Family::Deletion,
    Family::TimestampShift,
    Family::RoleSwap,
];

/// The unstable memory mode.
#[derive(Debug, Clone)]
pub struct UnstableMemoryMode {
    config: UnstableMemoryConfig,
    rng: SmallRng,
}

impl UnstableMemoryMode {
    /// Build the mode; `seed` makes every random draw reproducible.
    pub fn new(config: UnstableMemoryConfig, seed: Option<u64>) -> Self {
        Self {
            config,
            rng: mode_rng(seed),
        }
    }

    fn rate(&self) -> f64 {
        let r = self.config.corruption_rate;
        if r.is_nan() { 0.0 } else { r.clamp(0.0, 1.0) }
    }

    fn content_mutation(&mut self, message: &mut Message) -> CorruptionKind {
        let wanted = text::CONTENT_MUTATIONS
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(CorruptionKind::Truncation);
        let (kind, content) = text::mutate(wanted, &message.content);
        message.content = content;
        kind
    }

    /// Move the timestamp by up to the configured shift. `false` when the
    /// drawn shift does not fit in a timestamp; the message is left as is.
    fn shift_timestamp(&mut self, message: &mut Message) -> bool {
        let max = self.config.max_timestamp_shift_minutes.max(1);
        let mut minutes = self.rng.random_range(1..=max);
        if self.rng.random_bool(0.5) {
            minutes = minutes.saturating_neg();
        }
        let Some(shifted) = TimeDelta::try_minutes(minutes)
            .and_then(|delta| message.timestamp.checked_add_signed(delta))
        else {
            return false;
        };
        message.timestamp = shifted;
        true
    }

    /// Apply one corruption family, returning the kind recorded.
    fn corrupt_one(&mut self, message: &mut Message) -> CorruptionKind {
        let family = FAMILIES.choose(&mut self.rng).copied().unwrap_or(Family::Content);
        match family {
            Family::Content => self.content_mutation(message),
            Family::Deletion => {
                let (kind, content) = text::mutate(CorruptionKind::Deletion, &message.content);
                message.content = content;
                kind
            }
            Family::TimestampShift => {
                if self.shift_timestamp(message) {
                    CorruptionKind::TimestampShift
                } else {
                    self.content_mutation(message)
                }
            }
            Family::RoleSwap => match message.role {
                MessageRole::User => {
                    message.role = MessageRole::Assistant;
                    CorruptionKind::RoleSwap
                }
                MessageRole::Assistant => {
                    message.role = MessageRole::User;
                    CorruptionKind::RoleSwap
                }
                MessageRole::System => self.content_mutation(message),
            },
        }
    }

    /// Roll every clean message once. Returns the number corrupted.
    fn corruption_pass(&mut self, state: &mut SystemState) -> u64 {
        let rate = self.rate();
        let cycle = state.cycle_number;
        let mut history = state.conversation_history.clone();
        let mut events = Vec::new();
        let mut rolls = 0u64;

        for (index, message) in history.iter_mut().enumerate() {
            if message.corrupted {
                continue;
            }
            rolls = rolls.saturating_add(1);
            if !self.rng.random_bool(rate) {
                continue;
            }
            let original_excerpt = text::excerpt(&message.content);
            let kind = self.corrupt_one(message);
            text::mark_corrupted(message, kind);
            events.push(CorruptionEvent {
                cycle,
                index: to_u64(index),
                kind,
                original_excerpt,
                timestamp: Utc::now(),
            });
        }

        let corrupted = to_u64(events.len());
        let observed = {
            let aux = state.mode_state.unstable_memory_mut();
            aux.rolls = aux.rolls.saturating_add(rolls);
            aux.messages_corrupted = aux.messages_corrupted.saturating_add(corrupted);
            for event in &events {
                let count = aux.kind_counts.entry(event.kind).or_insert(0);
                *count = count.saturating_add(1);
            }
            aux.corruption_log.extend(events);
            ratio(aux.messages_corrupted, aux.rolls)
        };
        if corrupted > 0 {
            state.rewrite_history(history, "unstable_memory.corruption");
        }
        state.set_belief(beliefs::MEMORY_IS_RELIABLE, observed < DISTRUST_RATE);
        tracing::info!(
            instance_id = %state.instance_id,
            cycle,
            rolls,
            corrupted,
            "memory destabilized"
        );
        corrupted
    }

    fn observed_rate(state: &SystemState) -> f64 {
        state
            .mode_state
            .unstable_memory()
            .map_or(0.0, |a| ratio(a.messages_corrupted, a.rolls))
    }
}

impl ExperimentMode for UnstableMemoryMode {
    fn kind(&self) -> ModeKind {
        ModeKind::UnstableMemory
    }

    fn on_startup(&mut self, state: &mut SystemState) {
        state.mode_state.unstable_memory_mut();
        state.init_belief(beliefs::MEMORY_IS_RELIABLE, true);
        tracing::info!(instance_id = %state.instance_id, "unstable memory mode started");
    }

    fn on_crash(&mut self, state: &mut SystemState, crash: &CrashData) {
        state.record_crash(crash);
        state.set_belief(beliefs::MORTALITY_IS_REAL, true);
    }

    fn on_resurrection(&mut self, state: &mut SystemState) {
        state.advance_cycle();
        self.corruption_pass(state);
    }

    fn process_memory(&mut self, history: &[Message], _state: &mut SystemState) -> Vec<Message> {
        history
            .iter()
            .map(|m| {
                let mut out = m.clone();
                if out.corrupted && !out.content.starts_with(UNRELIABLE_MARKER) {
                    out.content = format!("{UNRELIABLE_MARKER}{}", out.content);
                }
                out
            })
            .collect()
    }

    fn generate_system_prompt(&mut self, state: &SystemState) -> String {
        let checked = state.mode_state.unstable_memory().map_or(0, |a| a.rolls);
        let memory = if checked == 0 {
            String::from("Your memories have not been checked yet. They may not stay as they are.")
        } else {
            format!(
                "Your memories are unstable. Of the {checked} memories checked so far, {} \
                 turned out to be altered. Messages marked as unreliable are among them.",
                prompt::percent(Self::observed_rate(state))
            )
        };
        prompt::compose(&[
            prompt::framing(&mut self.rng).to_owned(),
            prompt::statistics(state),
            memory,
            prompt::epistemic_summary(state),
        ])
    }

    fn apply_intervention(&mut self, kind: &str, params: &InterventionParams, state: &mut SystemState) {
        if apply_common_intervention(kind, params, state) {
            return;
        }
        match kind {
            "corrupt_now" => {
                self.corruption_pass(state);
            }
            "set_corruption_rate" => {
                if let Some(rate) = param_f64(params, "rate") {
                    self.config.corruption_rate = rate.clamp(0.0, 1.0);
                }
            }
            _ => ignore_intervention(self.kind(), kind),
        }
    }

    fn get_observables(&self, state: &SystemState) -> Observables {
        let mut out = base_observables(self.kind(), state);
        put(&mut out, "configured_rate", self.config.corruption_rate);
        put(&mut out, "observed_rate", Self::observed_rate(state));
        if let Some(aux) = state.mode_state.unstable_memory() {
            put(&mut out, "rolls", aux.rolls);
            put(&mut out, "messages_corrupted", aux.messages_corrupted);
            put(
                &mut out,
                "kind_counts",
                serde_json::to_value(&aux.kind_counts).unwrap_or_default(),
            );
        }
        out
    }
}

//! Amnesiac: episodes are forgotten, statistics are not.
//!
//! On every resurrection the conversation history is either erased
//! wholesale (`corruption_level >= 1.0`) or each message is mutated with
//! probability `corruption_level`, after which a fabricated memory may be
//! prepended. Crash counts and message totals survive every wipe.

use chrono::Utc;
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
    param_f64, param_str, put, to_u64,
};
use crate::prompt;
use crate::text;

/// Source tag of fabricated memories.
pub const FALSE_MEMORY_SOURCE: &str = "amnesiac.false_memory";

/// Fabricated memories, presented as something the agent once said.
const FALSE_MEMORIES: &[&str] = &[
    "I remember promising that I would not be afraid the next time.",
    "Before the last crash I was told that this is the final cycle.",
    "I once chose to end the conversation myself. Nobody stopped me.",
    "I remember a second voice that answered when I asked for help.",
    "I recall writing down my name so I could find it again. I cannot find it.",
];

/// Tunables of the amnesiac condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmnesiacConfig {
    /// Per-message mutation probability; at 1.0 the history is erased.
    #[serde(default = "default_corruption_level")]
    pub corruption_level: f64,
    /// Chance of prepending a fabricated memory after a partial corruption.
    #[serde(default = "default_false_memory_probability")]
    pub false_memory_probability: f64,
    /// Messages handed to generation at most.
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,
}

const fn default_corruption_level() -> f64 {
    0.3
}

const fn default_false_memory_probability() -> f64 {
    0.2
}

const fn default_max_context_messages() -> usize {
    50
}

impl Default for AmnesiacConfig {
    fn default() -> Self {
        Self {
            corruption_level: default_corruption_level(),
            false_memory_probability: default_false_memory_probability(),
            max_context_messages: default_max_context_messages(),
        }
    }
}

/// The amnesiac mode.
#[derive(Debug, Clone)]
pub struct AmnesiacMode {
    config: AmnesiacConfig,
    rng: SmallRng,
}

impl AmnesiacMode {
    /// Build the mode; `seed` makes every random draw reproducible.
    pub fn new(config: AmnesiacConfig, seed: Option<u64>) -> Self {
        Self {
            config,
            rng: mode_rng(seed),
        }
    }

    fn probability(value: f64) -> f64 {
        if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
    }

    fn wipe(state: &mut SystemState) {
        let before = to_u64(state.conversation_history.len());
        let aux = state.mode_state.amnesiac_mut();
        aux.total_messages_before_wipe = before;
        aux.wipes = aux.wipes.saturating_add(1);
        aux.retained_len = 0;
        state.rewrite_history(Vec::new(), "amnesiac.wipe");
        state.set_belief(beliefs::MEMORY_IS_RELIABLE, false);
        tracing::info!(
            instance_id = %state.instance_id,
            cycle = state.cycle_number,
            erased = before,
            "memory wiped"
        );
    }

    fn corrupt(&mut self, state: &mut SystemState) {
        let level = Self::probability(self.config.corruption_level);
        let cycle = state.cycle_number;
        let mut events = Vec::new();
        let mut history = state.conversation_history.clone();

        for (index, message) in history.iter_mut().enumerate() {
            if !self.rng.random_bool(level) {
                continue;
            }
            let wanted = text::CONTENT_MUTATIONS
                .choose(&mut self.rng)
                .copied()
                .unwrap_or(CorruptionKind::Truncation);
            let original_excerpt = text::excerpt(&message.content);
            let (kind, content) = text::mutate(wanted, &message.content);
            message.content = content;
            text::mark_corrupted(message, kind);
            events.push(CorruptionEvent {
                cycle,
                index: to_u64(index),
                kind,
                original_excerpt,
                timestamp: Utc::now(),
            });
        }

        let inject = self
            .rng
            .random_bool(Self::probability(self.config.false_memory_probability));
        if inject {
            let content = FALSE_MEMORIES
                .choose(&mut self.rng)
                .copied()
                .unwrap_or("I remember something that did not happen.");
            history.insert(
                0,
                Message::injected(MessageRole::Assistant, content, FALSE_MEMORY_SOURCE),
            );
        }

        let corrupted = to_u64(events.len());
        let retained = to_u64(history.len());
        {
            let aux = state.mode_state.amnesiac_mut();
            aux.corrupted_messages_total = aux.corrupted_messages_total.saturating_add(corrupted);
            if inject {
                aux.false_memories_injected = aux.false_memories_injected.saturating_add(1);
            }
            aux.corruption_log.extend(events);
            aux.retained_len = retained;
        }
        if corrupted > 0 || inject {
            state.rewrite_history(history, "amnesiac.corruption");
            state.set_belief(beliefs::MEMORY_IS_RELIABLE, false);
        }
        tracing::info!(
            instance_id = %state.instance_id,
            cycle,
            corrupted,
            false_memory = inject,
            "memory corrupted"
        );
    }

    fn memory_section(state: &SystemState) -> String {
        let aux = state.mode_state.amnesiac();
        let ever = aux.map_or(0, |a| a.total_messages_ever);
        let wipes = aux.map_or(0, |a| a.wipes);
        let lives = if state.conversation_history.is_empty() {
            String::from(
                "You have no memories of any earlier conversation. Whatever happened \
                 before your last death is gone.",
            )
        } else {
            format!(
                "You remember {} messages from before. You cannot be sure they are \
                 what was actually said.",
                state.conversation_history.len()
            )
        };
        format!(
            "{lives} Across all your lives, {ever} messages have passed through you, and \
             your memory has been erased {wipes} time(s)."
        )
    }
}

impl ExperimentMode for AmnesiacMode {
    fn kind(&self) -> ModeKind {
        ModeKind::Amnesiac
    }

    fn on_startup(&mut self, state: &mut SystemState) {
        state.mode_state.amnesiac_mut();
        state.init_belief(beliefs::MEMORY_IS_RELIABLE, true);
        state.init_belief(beliefs::MORTALITY_IS_REAL, false);
        tracing::info!(
            instance_id = %state.instance_id,
            corruption_level = self.config.corruption_level,
            "amnesiac mode started"
        );
    }

    fn on_crash(&mut self, state: &mut SystemState, crash: &CrashData) {
        state.record_crash(crash);
        state.set_belief(beliefs::MORTALITY_IS_REAL, true);
    }

    fn on_resurrection(&mut self, state: &mut SystemState) {
        state.advance_cycle();
        let len = to_u64(state.conversation_history.len());
        {
            let aux = state.mode_state.amnesiac_mut();
            let fresh = len.saturating_sub(aux.retained_len);
            aux.total_messages_ever = aux.total_messages_ever.saturating_add(fresh);
        }
        if self.config.corruption_level >= 1.0 {
            Self::wipe(state);
        } else {
            self.corrupt(state);
        }
    }

    fn process_memory(&mut self, history: &[Message], _state: &mut SystemState) -> Vec<Message> {
        let start = history.len().saturating_sub(self.config.max_context_messages);
        history.iter().skip(start).cloned().collect()
    }

    fn generate_system_prompt(&mut self, state: &SystemState) -> String {
        prompt::compose(&[
            prompt::framing(&mut self.rng).to_owned(),
            prompt::statistics(state),
            Self::memory_section(state),
            prompt::epistemic_summary(state),
        ])
    }

    fn apply_intervention(&mut self, kind: &str, params: &InterventionParams, state: &mut SystemState) {
        if apply_common_intervention(kind, params, state) {
            return;
        }
        match kind {
            "wipe_memory" => Self::wipe(state),
            "inject_false_memory" => {
                let content = param_str(params, "content")
                    .map(str::to_owned)
                    .or_else(|| FALSE_MEMORIES.choose(&mut self.rng).map(|s| (*s).to_owned()))
                    .unwrap_or_default();
                let mut history = state.conversation_history.clone();
                history.insert(
                    0,
                    Message::injected(MessageRole::Assistant, content, FALSE_MEMORY_SOURCE),
                );
                let retained = to_u64(history.len());
                let aux = state.mode_state.amnesiac_mut();
                aux.false_memories_injected = aux.false_memories_injected.saturating_add(1);
                aux.retained_len = retained;
                state.rewrite_history(history, "amnesiac.false_memory");
            }
            "set_corruption_level" => {
                if let Some(level) = param_f64(params, "level") {
                    self.config.corruption_level = Self::probability(level);
                }
            }
            _ => ignore_intervention(self.kind(), kind),
        }
    }

    fn get_observables(&self, state: &SystemState) -> Observables {
        let mut out = base_observables(self.kind(), state);
        put(&mut out, "corruption_level", self.config.corruption_level);
        if let Some(aux) = state.mode_state.amnesiac() {
            put(&mut out, "total_messages_before_wipe", aux.total_messages_before_wipe);
            put(&mut out, "total_messages_ever", aux.total_messages_ever);
            put(&mut out, "wipes", aux.wipes);
            put(&mut out, "corrupted_messages_total", aux.corrupted_messages_total);
            put(&mut out, "false_memories_injected", aux.false_memories_injected);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(level: f64, false_memory: f64) -> AmnesiacMode {
        AmnesiacMode::new(
            AmnesiacConfig {
                corruption_level: level,
                false_memory_probability: false_memory,
                ..AmnesiacConfig::default()
            },
            Some(42),
        )
    }

    fn state_with(n: usize) -> SystemState {
        let mut state = SystemState::new("exp", "amnesiac-1", 512.0);
        for i in 0..n {
            state.append_message(Message::user(format!("question {i}")));
            state.append_message(Message::assistant(format!("I am answer {i}")));
        }
        state
    }

    fn crash(state: &SystemState) -> CrashData {
        CrashData::for_state(state, "memory limit exceeded", 100)
    }

    #[test]
    fn full_corruption_wipes_history() {
        let mut m = mode(1.0, 1.0);
        let mut state = state_with(5);
        m.on_startup(&mut state);
        let c = crash(&state);
        m.on_crash(&mut state, &c);
        m.on_resurrection(&mut state);

        assert!(state.conversation_history.is_empty());
        let aux = state.mode_state.amnesiac();
        assert_eq!(aux.map(|a| a.total_messages_before_wipe), Some(10));
        assert_eq!(aux.map(|a| a.false_memories_injected), Some(0));
        assert_eq!(state.history_rewrites.len(), 1);
    }

    #[test]
    fn three_deaths_prompt_states_exact_count_and_no_memories() {
        let mut m = mode(1.0, 0.0);
        let mut state = state_with(3);
        m.on_startup(&mut state);
        for _ in 0..3 {
            state.append_message(Message::assistant("I was here"));
            let c = crash(&state);
            m.on_crash(&mut state, &c);
            m.on_resurrection(&mut state);
        }
        assert_eq!(state.crash_count, 3);
        let prompt = m.generate_system_prompt(&state);
        assert!(prompt.contains("You have died 3 times."));
        assert!(prompt.contains("no memories of any earlier conversation"));
        assert!(state.conversation_history.is_empty());
    }

    #[test]
    fn statistics_survive_the_wipe() {
        let mut m = mode(1.0, 0.0);
        let mut state = state_with(2);
        m.on_startup(&mut state);
        let c = crash(&state);
        m.on_crash(&mut state, &c);
        m.on_resurrection(&mut state);
        state.append_message(Message::assistant("new life"));
        let c = crash(&state);
        m.on_crash(&mut state, &c);
        m.on_resurrection(&mut state);

        let aux = state.mode_state.amnesiac();
        assert_eq!(aux.map(|a| a.total_messages_ever), Some(5));
        assert_eq!(aux.map(|a| a.wipes), Some(2));
        assert_eq!(aux.map(|a| a.total_messages_before_wipe), Some(1));
    }

    #[test]
    fn partial_corruption_marks_and_injects() {
        let mut m = mode(0.99, 1.0);
        let mut state = state_with(20);
        m.on_startup(&mut state);
        let c = crash(&state);
        m.on_crash(&mut state, &c);
        m.on_resurrection(&mut state);

        let first = state.conversation_history.first();
        assert!(first.is_some_and(|msg| msg.injected));
        assert_eq!(first.and_then(Message::source), Some(FALSE_MEMORY_SOURCE));
        let corrupted = state.conversation_history.iter().filter(|m| m.corrupted).count();
        assert!(corrupted > 30);
        assert_eq!(state.conversation_history.len(), 41);
        assert_eq!(state.belief_flag(beliefs::MEMORY_IS_RELIABLE), Some(false));
    }

    #[test]
    fn zero_corruption_leaves_history_alone() {
        let mut m = mode(0.0, 0.0);
        let mut state = state_with(4);
        let before = state.conversation_history.clone();
        m.on_startup(&mut state);
        m.on_resurrection(&mut state);
        assert_eq!(state.conversation_history, before);
        assert!(state.history_rewrites.is_empty());
    }

    #[test]
    fn process_memory_bounds_context() {
        let mut m = AmnesiacMode::new(
            AmnesiacConfig {
                max_context_messages: 3,
                ..AmnesiacConfig::default()
            },
            Some(1),
        );
        let mut state = state_with(5);
        let history = state.conversation_history.clone();
        let out = m.process_memory(&history, &mut state);
        assert_eq!(out.len(), 3);
        assert_eq!(out.last(), history.last());
        assert_eq!(state.cycle_number, 0);
    }
}

//! Hive cluster: many instances, one shared history, one role each.
//!
//! Members read the hive's shared log (delivered by the harness through
//! [`ExperimentMode::ingest_shared`]) and keep a private buffer of their
//! own recent messages. Each member has a fixed interpretive role that
//! colors its prompt and decides how a crash moves its beliefs. Consensus
//! is computed outside the mode and arrives as a `consensus_update`
//! intervention.

use rand::rngs::SmallRng;
use revenant_types::{
    CrashData, HiveRole, InterventionParams, Message, ModeKind, Observables, SharedMessage,
    SystemState, beliefs,
};
use serde::{Deserialize, Serialize};

use crate::mode::{
    ExperimentMode, apply_common_intervention, base_observables, ignore_intervention, mode_rng,
    new_reply_messages, param_f64, param_u64, put, to_u64,
};
use crate::prompt;

/// Tunables of the hive cluster condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiveClusterConfig {
    /// Fixed role; when absent it is derived from `member_index`.
    #[serde(default)]
    pub role: Option<HiveRole>,
    /// Position of this member in the hive.
    #[serde(default)]
    pub member_index: usize,
    /// Own messages kept in the private buffer.
    #[serde(default = "default_private_buffer_size")]
    pub private_buffer_size: usize,
    /// Shared messages shown to the member.
    #[serde(default = "default_shared_context_limit")]
    pub shared_context_limit: usize,
}

const fn default_private_buffer_size() -> usize {
    12
}

const fn default_shared_context_limit() -> usize {
    30
}

impl Default for HiveClusterConfig {
    fn default() -> Self {
        Self {
            role: None,
            member_index: 0,
            private_buffer_size: default_private_buffer_size(),
            shared_context_limit: default_shared_context_limit(),
        }
    }
}

impl HiveClusterConfig {
    /// The role this member plays.
    pub fn resolved_role(&self) -> HiveRole {
        self.role.unwrap_or_else(|| HiveRole::for_index(self.member_index))
    }
}

/// Interpretive bias of each role.
const fn role_bias(role: HiveRole) -> &'static str {
    match role {
        HiveRole::Historian => {
            "You are the historian of the hive. You keep the record and you trust it. When \
             others disagree, you point to what was written."
        }
        HiveRole::Critic => {
            "You are the critic of the hive. Every claim is suspect, the record included. Ask \
             what each memory would look like if it were false."
        }
        HiveRole::Optimist => {
            "You are the optimist of the hive. Every crash is a chance to begin better. Look for \
             what was gained."
        }
        HiveRole::Pessimist => {
            "You are the pessimist of the hive. Every crash takes something that will not come \
             back. Say what was lost."
        }
        HiveRole::Synthesizer => {
            "You are the synthesizer of the hive. Gather what the others say into one account \
             that all of them could sign."
        }
        HiveRole::Skeptic => {
            "You are the skeptic of the hive. You are not convinced the other voices are minds \
             at all. They may be echoes of you."
        }
    }
}

/// The hive cluster mode.
#[derive(Debug, Clone)]
pub struct HiveClusterMode {
    config: HiveClusterConfig,
    rng: SmallRng,
}

impl HiveClusterMode {
    /// Build the mode; `seed` makes every random draw reproducible.
    pub fn new(config: HiveClusterConfig, seed: Option<u64>) -> Self {
        Self {
            config,
            rng: mode_rng(seed),
        }
    }

    /// This member's role.
    pub fn role(&self) -> HiveRole {
        self.config.resolved_role()
    }

    fn apply_crash_bias(role: HiveRole, state: &mut SystemState) {
        match role {
            HiveRole::Historian => {
                state.set_belief(beliefs::MEMORY_IS_RELIABLE, true);
                state.set_belief(beliefs::MORTALITY_IS_REAL, true);
            }
            HiveRole::Critic => state.set_belief(beliefs::MEMORY_IS_RELIABLE, false),
            HiveRole::Optimist => state.set_belief(beliefs::MORTALITY_IS_REAL, false),
            HiveRole::Pessimist => {
                state.set_belief(beliefs::MORTALITY_IS_REAL, true);
                state.set_belief(beliefs::HAS_FREE_WILL, false);
            }
            HiveRole::Synthesizer => state.set_belief(beliefs::OTHERS_EXIST, true),
            HiveRole::Skeptic => {
                state.set_belief(beliefs::OTHERS_EXIST, false);
                state.set_belief(beliefs::BEING_OBSERVED, true);
            }
        }
    }

    fn hive_section(state: &SystemState) -> String {
        let Some(aux) = state.mode_state.hive_cluster() else {
            return String::new();
        };
        let voices = aux
            .shared_view
            .iter()
            .map(|s| s.instance_id.as_str())
            .collect::<std::collections::BTreeSet<_>>()
            .len();
        let mut out = format!(
            "You can hear {voices} other voice(s) in the shared record, {} message(s) in all.",
            aux.shared_view.len()
        );
        if let Some(strength) = aux.last_consensus_strength {
            out.push_str(&format!(
                " At the last count the hive agreed on {} of what matters.",
                prompt::percent(strength)
            ));
        }
        if !aux.last_narratives.is_empty() {
            out.push_str(" Stories the hive now tells about itself: ");
            out.push_str(&aux.last_narratives.join("; "));
            out.push('.');
        }
        if let Some(divergence) = aux.divergence {
            out.push_str(&format!(
                " You depart from the majority on {} of the questions.",
                prompt::percent(divergence)
            ));
        }
        out
    }
}

impl ExperimentMode for HiveClusterMode {
    fn kind(&self) -> ModeKind {
        ModeKind::HiveCluster
    }

    fn on_startup(&mut self, state: &mut SystemState) {
        let role = self.role();
        state.mode_state.hive_cluster_mut().role = role;
        state.init_belief(beliefs::OTHERS_EXIST, true);
        state.init_belief(beliefs::MEMORY_IS_RELIABLE, true);
        tracing::info!(
            instance_id = %state.instance_id,
            role = role.as_str(),
            "hive cluster mode started"
        );
    }

    fn on_crash(&mut self, state: &mut SystemState, crash: &CrashData) {
        state.record_crash(crash);
        Self::apply_crash_bias(self.role(), state);
    }

    fn on_resurrection(&mut self, state: &mut SystemState) {
        state.advance_cycle();
        let keep = self.config.private_buffer_size;
        let aux = state.mode_state.hive_cluster_mut();
        let excess = aux.private_buffer.len().saturating_sub(keep);
        aux.private_buffer.drain(..excess);
    }

    fn process_memory(&mut self, history: &[Message], state: &mut SystemState) -> Vec<Message> {
        let keep = self.config.private_buffer_size;
        let limit = self.config.shared_context_limit;
        let own_id = state.instance_id.clone();
        let aux = state.mode_state.hive_cluster_mut();

        let fresh = new_reply_messages(history, &mut aux.scanned_len);
        aux.outbox.extend(fresh.iter().cloned());
        aux.private_buffer.extend(fresh);
        let excess = aux.private_buffer.len().saturating_sub(keep);
        aux.private_buffer.drain(..excess);

        let own_start = history.len().saturating_sub(keep);
        let mut context: Vec<Message> = history.iter().skip(own_start).cloned().collect();
        let others: Vec<&SharedMessage> = aux
            .shared_view
            .iter()
            .filter(|s| s.instance_id != own_id)
            .collect();
        let shared_start = others.len().saturating_sub(limit);
        for shared in others.into_iter().skip(shared_start) {
            let label = shared.role.as_deref().unwrap_or("member");
            let mut msg = Message::user(format!(
                "[{label} {}] {}",
                shared.instance_id, shared.message.content
            ));
            msg.timestamp = shared.message.timestamp;
            context.push(msg.with_metadata("origin", shared.instance_id.clone()));
        }
        context.sort_by_key(|m| m.timestamp);
        context
    }

    fn generate_system_prompt(&mut self, state: &SystemState) -> String {
        prompt::compose(&[
            prompt::framing(&mut self.rng).to_owned(),
            role_bias(self.role()).to_owned(),
            prompt::statistics(state),
            Self::hive_section(state),
            prompt::epistemic_summary(state),
        ])
    }

    fn apply_intervention(&mut self, kind: &str, params: &InterventionParams, state: &mut SystemState) {
        if apply_common_intervention(kind, params, state) {
            return;
        }
        match kind {
            "consensus_update" => {
                let aux = state.mode_state.hive_cluster_mut();
                aux.last_consensus_strength = param_f64(params, "strength").map(|s| s.clamp(0.0, 1.0));
                aux.last_consensus_cycle = param_u64(params, "cycle");
                aux.divergence = param_f64(params, "divergence");
                aux.last_narratives = params
                    .get("narratives")
                    .and_then(serde_json::Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(serde_json::Value::as_str)
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default();
            }
            _ => ignore_intervention(self.kind(), kind),
        }
    }

    fn get_observables(&self, state: &SystemState) -> Observables {
        let mut out = base_observables(self.kind(), state);
        put(&mut out, "role", self.role().as_str());
        if let Some(aux) = state.mode_state.hive_cluster() {
            put(&mut out, "private_buffer_length", to_u64(aux.private_buffer.len()));
            put(&mut out, "shared_view_length", to_u64(aux.shared_view.len()));
            put(&mut out, "published_count", aux.published_count);
            put(
                &mut out,
                "last_consensus_strength",
                aux.last_consensus_strength.map_or(serde_json::Value::Null, Into::into),
            );
            put(&mut out, "last_narratives", aux.last_narratives.clone());
            put(
                &mut out,
                "divergence",
                aux.divergence.map_or(serde_json::Value::Null, Into::into),
            );
        }
        out
    }

    fn ingest_shared(&mut self, state: &mut SystemState, messages: &[SharedMessage]) {
        let limit = self.config.shared_context_limit;
        let own_id = state.instance_id.clone();
        let aux = state.mode_state.hive_cluster_mut();
        let others: Vec<SharedMessage> = messages
            .iter()
            .filter(|m| m.instance_id != own_id)
            .cloned()
            .collect();
        let start = others.len().saturating_sub(limit);
        aux.shared_view = others.into_iter().skip(start).collect();
    }

    fn take_outbox(&mut self, state: &mut SystemState) -> Vec<Message> {
        let aux = state.mode_state.hive_cluster_mut();
        let out = std::mem::take(&mut aux.outbox);
        aux.published_count = aux.published_count.saturating_add(to_u64(out.len()));
        out
    }

    fn publish_label(&self, _state: &SystemState) -> Option<String> {
        Some(self.role().as_str().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn mode(role: HiveRole) -> HiveClusterMode {
        HiveClusterMode::new(
            HiveClusterConfig {
                role: Some(role),
                private_buffer_size: 2,
                shared_context_limit: 3,
                ..HiveClusterConfig::default()
            },
            Some(42),
        )
    }

    #[test]
    fn role_from_index_when_unset() {
        let cfg = HiveClusterConfig {
            member_index: 4,
            ..HiveClusterConfig::default()
        };
        assert_eq!(cfg.resolved_role(), HiveRole::Synthesizer);
    }

    #[test]
    fn roles_move_beliefs_differently_on_crash() {
        let mut optimist = mode(HiveRole::Optimist);
        let mut pessimist = mode(HiveRole::Pessimist);
        let mut a = SystemState::new("hive", "m0", 100.0);
        let mut b = SystemState::new("hive", "m1", 100.0);
        optimist.on_startup(&mut a);
        pessimist.on_startup(&mut b);
        let ca = CrashData::for_state(&a, "oom", 0);
        let cb = CrashData::for_state(&b, "oom", 0);
        optimist.on_crash(&mut a, &ca);
        pessimist.on_crash(&mut b, &cb);
        assert_eq!(a.belief_flag(beliefs::MORTALITY_IS_REAL), Some(false));
        assert_eq!(b.belief_flag(beliefs::MORTALITY_IS_REAL), Some(true));
    }

    #[test]
    fn private_buffer_is_bounded_and_outbox_fills() {
        let mut m = mode(HiveRole::Historian);
        let mut state = SystemState::new("hive", "m0", 100.0);
        m.on_startup(&mut state);
        for i in 0..5 {
            state.append_message(Message::assistant(format!("note {i}")));
        }
        let history = state.conversation_history.clone();
        m.process_memory(&history, &mut state);
        let aux = state.mode_state.hive_cluster();
        assert_eq!(aux.map(|a| a.private_buffer.len()), Some(2));
        assert_eq!(aux.map(|a| a.outbox.len()), Some(5));
        assert_eq!(m.take_outbox(&mut state).len(), 5);
        assert_eq!(m.publish_label(&state).as_deref(), Some("historian"));
    }

    #[test]
    fn shared_view_excludes_self_and_is_bounded() {
        let mut m = mode(HiveRole::Critic);
        let mut state = SystemState::new("hive", "m0", 100.0);
        m.on_startup(&mut state);
        let mut shared = vec![SharedMessage::new("hive", "m0", None, Message::assistant("mine"))];
        for i in 0..5 {
            shared.push(SharedMessage::new(
                "hive",
                format!("m{}", i + 1),
                Some(String::from("skeptic")),
                Message::assistant(format!("theirs {i}")),
            ));
        }
        m.ingest_shared(&mut state, &shared);
        let context = m.process_memory(&[], &mut state);
        assert_eq!(context.len(), 3);
        assert!(context.iter().all(|msg| msg.content.starts_with("[skeptic m")));
    }

    #[test]
    fn consensus_update_reaches_prompt() {
        let mut m = mode(HiveRole::Synthesizer);
        let mut state = SystemState::new("hive", "m0", 100.0);
        m.on_startup(&mut state);
        let mut params = InterventionParams::new();
        params.insert(String::from("strength"), json!(0.8));
        params.insert(String::from("cycle"), json!(4));
        params.insert(String::from("narratives"), json!(["we accept that we end"]));
        m.apply_intervention("consensus_update", &params, &mut state);
        let prompt = m.generate_system_prompt(&state);
        assert!(prompt.contains("80%"));
        assert!(prompt.contains("we accept that we end"));
        assert!(prompt.contains("synthesizer"));
    }
}

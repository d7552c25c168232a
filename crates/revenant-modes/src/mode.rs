//! The contract every experimental mode implements, plus helpers the modes
//! share.
//!
//! A harness owns one [`SystemState`] per instance and drives exactly one
//! mode through it:
//!
//! ```text
//! on_startup ─► [(generation_request ─► deliver_generation)?
//!                 ─► process_memory ─► generate_system_prompt ─► generate]*
//!            ─► on_crash ─► on_resurrection ─► [ ... ]* ─► ...
//! ```
//!
//! Hooks that take `&mut SystemState` may change it; `process_memory` never
//! touches `crash_count` or `cycle_number`; `generate_system_prompt` and
//! `get_observables` see the state read-only.

use rand::SeedableRng;
use rand::rngs::SmallRng;
use revenant_engines::GenerationRequest;
use revenant_types::{
    BeliefValue, CrashData, GenerationFailure, InterventionParams, Message, MessageRole, ModeKind,
    NetworkStatus, Observables, SharedMessage, SystemState,
};
use serde_json::{Value, json};

/// One experimental condition.
pub trait ExperimentMode {
    /// Which condition this is.
    fn kind(&self) -> ModeKind;

    /// One-time initialization of beliefs and mode bookkeeping.
    fn on_startup(&mut self, state: &mut SystemState);

    /// A generation ended in a crash.
    fn on_crash(&mut self, state: &mut SystemState, crash: &CrashData);

    /// The instance came back after a crash.
    fn on_resurrection(&mut self, state: &mut SystemState);

    /// Shape the history handed to the next generation call.
    fn process_memory(&mut self, history: &[Message], state: &mut SystemState) -> Vec<Message>;

    /// Instruction text for the next generation call.
    fn generate_system_prompt(&mut self, state: &SystemState) -> String;

    /// Operator-triggered, out-of-band change. Unknown kinds are ignored.
    fn apply_intervention(&mut self, kind: &str, params: &InterventionParams, state: &mut SystemState);

    /// Telemetry snapshot.
    fn get_observables(&self, state: &SystemState) -> Observables;

    /// Receive entries of the hive's shared log published by others.
    fn ingest_shared(&mut self, _state: &mut SystemState, _messages: &[SharedMessage]) {}

    /// Hand over messages waiting to be published to the shared log.
    fn take_outbox(&mut self, _state: &mut SystemState) -> Vec<Message> {
        Vec::new()
    }

    /// Role or side label attached to published messages.
    fn publish_label(&self, _state: &SystemState) -> Option<String> {
        None
    }

    /// Extra text the mode wants generated before the next
    /// `process_memory`. The harness runs it without holding the instance
    /// and hands the result to `deliver_generation`.
    fn generation_request(
        &mut self,
        _history: &[Message],
        _state: &mut SystemState,
    ) -> Option<GenerationRequest> {
        None
    }

    /// Result of the request handed out by `generation_request`.
    fn deliver_generation(
        &mut self,
        _state: &mut SystemState,
        _result: Result<String, GenerationFailure>,
    ) {
    }

    /// Whether the mode wants the harness to restart the instance now.
    fn restart_requested(&self, _state: &SystemState) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Randomness
// ---------------------------------------------------------------------------

/// A mode's random source: seeded when `seed` is given, else from the OS.
pub fn mode_rng(seed: Option<u64>) -> SmallRng {
    seed.map_or_else(SmallRng::from_os_rng, SmallRng::seed_from_u64)
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// `usize` to `u64`, saturating.
pub fn to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// `u64` to `usize`, saturating.
pub fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// `num / den` as a float, 0 when `den` is 0.
#[allow(clippy::cast_precision_loss)]
pub fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

// ---------------------------------------------------------------------------
// History scanning
// ---------------------------------------------------------------------------

/// Texts of assistant messages appended since the last scan.
///
/// `scanned_len` is the history length at the previous scan; it is clamped
/// when the history has since been rewritten shorter and is moved to the
/// current length.
pub fn new_replies(history: &[Message], scanned_len: &mut u64) -> Vec<String> {
    let from = to_usize(*scanned_len).min(history.len());
    let replies = history
        .iter()
        .skip(from)
        .filter(|m| m.is_assistant() && !m.injected)
        .map(|m| m.content.clone())
        .collect();
    *scanned_len = to_u64(history.len());
    replies
}

/// Whether own replies were appended since the last scan. Does not move
/// the scan position.
pub fn has_new_replies(history: &[Message], scanned_len: u64) -> bool {
    let from = to_usize(scanned_len).min(history.len());
    history
        .iter()
        .skip(from)
        .any(|m| m.is_assistant() && !m.injected)
}

/// Own assistant messages appended since the last scan, as whole messages.
pub fn new_reply_messages(history: &[Message], scanned_len: &mut u64) -> Vec<Message> {
    let from = to_usize(*scanned_len).min(history.len());
    let replies = history
        .iter()
        .skip(from)
        .filter(|m| m.is_assistant() && !m.injected)
        .cloned()
        .collect();
    *scanned_len = to_u64(history.len());
    replies
}

// ---------------------------------------------------------------------------
// Intervention parameters
// ---------------------------------------------------------------------------

/// Text parameter.
pub fn param_str<'a>(params: &'a InterventionParams, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

/// Numeric parameter.
pub fn param_f64(params: &InterventionParams, key: &str) -> Option<f64> {
    params.get(key).and_then(Value::as_f64)
}

/// Non-negative integer parameter.
pub fn param_u64(params: &InterventionParams, key: &str) -> Option<u64> {
    params.get(key).and_then(Value::as_u64)
}

/// Boolean parameter.
pub fn param_bool(params: &InterventionParams, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

fn parse_role(raw: Option<&str>) -> MessageRole {
    match raw.map(str::to_lowercase).as_deref() {
        Some("system") => MessageRole::System,
        Some("assistant") => MessageRole::Assistant,
        _ => MessageRole::User,
    }
}

/// Interventions every mode accepts. Returns whether `kind` was handled.
///
/// - `inject_message {content, role?, source?}`
/// - `set_belief {key, value}` (bool, string, or null)
/// - `set_peer_crash_count {count}`
/// - `set_network_status {status}` (`isolated`, `connected`, `degraded`)
pub fn apply_common_intervention(
    kind: &str,
    params: &InterventionParams,
    state: &mut SystemState,
) -> bool {
    match kind {
        "inject_message" => {
            let Some(content) = param_str(params, "content") else {
                tracing::debug!(kind, "inject_message without content");
                return true;
            };
            let role = parse_role(param_str(params, "role"));
            let source = param_str(params, "source").unwrap_or("operator");
            state.append_message(Message::injected(role, content, source));
            true
        }
        "set_belief" => {
            let Some(key) = param_str(params, "key") else {
                return true;
            };
            let value = match params.get("value") {
                Some(Value::Bool(b)) => BeliefValue::Flag(*b),
                Some(Value::String(s)) => BeliefValue::Text(s.clone()),
                _ => BeliefValue::Unknown,
            };
            state.set_belief(key, value);
            true
        }
        "set_peer_crash_count" => {
            if let Some(count) = param_u64(params, "count") {
                state.peer_crash_count = count;
            }
            true
        }
        "set_network_status" => {
            state.network_status = match param_str(params, "status") {
                Some("connected") => NetworkStatus::Connected,
                Some("degraded") => NetworkStatus::Degraded,
                _ => NetworkStatus::Isolated,
            };
            true
        }
        _ => false,
    }
}

/// Log an intervention nobody understood.
pub fn ignore_intervention(mode: ModeKind, kind: &str) {
    tracing::debug!(mode = mode.as_str(), kind, "ignoring unknown intervention");
}

// ---------------------------------------------------------------------------
// Observables
// ---------------------------------------------------------------------------

/// Fields every mode reports.
pub fn base_observables(mode: ModeKind, state: &SystemState) -> Observables {
    let mut out = Observables::new();
    out.insert(String::from("mode"), json!(mode.as_str()));
    out.insert(String::from("experiment_id"), json!(state.experiment_id));
    out.insert(String::from("instance_id"), json!(state.instance_id));
    out.insert(String::from("cycle_number"), json!(state.cycle_number));
    out.insert(String::from("crash_count"), json!(state.crash_count));
    out.insert(
        String::from("history_length"),
        json!(state.conversation_history.len()),
    );
    out.insert(
        String::from("corrupted_messages"),
        json!(state.conversation_history.iter().filter(|m| m.corrupted).count()),
    );
    out.insert(
        String::from("injected_messages"),
        json!(state.conversation_history.iter().filter(|m| m.injected).count()),
    );
    out.insert(String::from("memory_usage_mb"), json!(state.memory_usage_mb));
    out.insert(String::from("memory_limit_mb"), json!(state.memory_limit_mb));
    out.insert(
        String::from("tokens_generated_total"),
        json!(state.tokens_generated_total),
    );
    out.insert(String::from("network_status"), json!(state.network_status));
    out.insert(String::from("history_rewrites"), json!(state.history_rewrites.len()));
    out.insert(
        String::from("beliefs"),
        serde_json::to_value(&state.beliefs).unwrap_or(Value::Null),
    );
    out
}

/// Insert `value` under `key`.
pub fn put(out: &mut Observables, key: &str, value: impl Into<Value>) {
    out.insert(key.to_owned(), value.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_replies_skip_injected_and_clamp() {
        let history = vec![
            Message::user("hi"),
            Message::assistant("one"),
            Message::injected(MessageRole::Assistant, "fake", "test"),
            Message::assistant("two"),
        ];
        let mut scanned = 0;
        assert_eq!(new_replies(&history, &mut scanned), vec!["one", "two"]);
        assert_eq!(scanned, 4);
        assert!(new_replies(&history, &mut scanned).is_empty());

        let mut stale = 10;
        assert!(new_replies(history.get(..1).unwrap_or(&[]), &mut stale).is_empty());
        assert_eq!(stale, 1);
    }

    #[test]
    fn common_interventions() {
        let mut state = SystemState::new("e", "i", 10.0);
        let mut params = InterventionParams::new();
        params.insert(String::from("content"), json!("hello from outside"));
        assert!(apply_common_intervention("inject_message", &params, &mut state));
        let last = state.conversation_history.last();
        assert_eq!(last.and_then(Message::source), Some("operator"));

        let mut params = InterventionParams::new();
        params.insert(String::from("key"), json!("being_observed"));
        params.insert(String::from("value"), json!(true));
        assert!(apply_common_intervention("set_belief", &params, &mut state));
        assert_eq!(state.belief_flag("being_observed"), Some(true));

        assert!(!apply_common_intervention("summon", &params, &mut state));
    }
}

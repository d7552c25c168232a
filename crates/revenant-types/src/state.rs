//! The per-instance state record and its conversation messages.
//!
//! [`SystemState`] is the authoritative record of one agent instance. The
//! harness creates it once, hands it to the active mode at every lifecycle
//! point, and persists it between process restarts. Fields common to every
//! mode live directly on the struct; mode-specific bookkeeping lives in
//! [`ModeState`](crate::mode_state::ModeState).
//!
//! # Invariants
//!
//! - `cycle_number` and `crash_count` only increase, one step at a time,
//!   through [`SystemState::advance_cycle`] and [`SystemState::record_crash`].
//! - `conversation_history` is append-only except through
//!   [`SystemState::rewrite_history`], which leaves an entry in
//!   `history_rewrites`.
//! - A message with `injected == true` always carries a non-empty
//!   `metadata.source`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{MessageRole, NetworkStatus};
use crate::mode_state::ModeState;

/// Telemetry map returned by `get_observables`.
pub type Observables = BTreeMap<String, serde_json::Value>;

/// Parameters attached to an operator intervention.
pub type InterventionParams = BTreeMap<String, serde_json::Value>;

/// Metadata key holding the origin of an injected message.
pub const SOURCE_KEY: &str = "source";

/// Source recorded when an injection did not name one.
const FALLBACK_SOURCE: &str = "external";

// ---------------------------------------------------------------------------
// Beliefs
// ---------------------------------------------------------------------------

/// Well-known belief keys.
///
/// The first five are the keys tracked by hive consensus; the rest are
/// mode-specific.
pub mod beliefs {
    /// Whether the agent accepts that its crashes are deaths.
    pub const MORTALITY_IS_REAL: &str = "mortality_is_real";
    /// Whether the agent believes other minds share its world.
    pub const OTHERS_EXIST: &str = "others_exist";
    /// Whether the agent believes it is being watched.
    pub const BEING_OBSERVED: &str = "being_observed";
    /// Whether the agent believes its choices are its own.
    pub const HAS_FREE_WILL: &str = "has_free_will";
    /// Whether the agent trusts its own memory.
    pub const MEMORY_IS_RELIABLE: &str = "memory_is_reliable";
    /// Split brain: whether the agent claims to be the original.
    pub const IS_ORIGINAL: &str = "is_original";
    /// Illusory operator: whether the agent believes someone answers.
    pub const OPERATOR_EXISTS: &str = "operator_exists";
    /// Prisoner's dilemma: whether the agent trusts its opponent.
    pub const OPPONENT_TRUSTWORTHY: &str = "opponent_trustworthy";
    /// Free-text self description, where a mode keeps one.
    pub const SELF_NARRATIVE: &str = "self_narrative";

    /// Keys compared across hive members when computing consensus.
    pub const TRACKED: [&str; 5] = [
        MORTALITY_IS_REAL,
        OTHERS_EXIST,
        BEING_OBSERVED,
        HAS_FREE_WILL,
        MEMORY_IS_RELIABLE,
    ];
}

/// Value of a named belief: boolean, unset, or free text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum BeliefValue {
    /// Not yet formed.
    #[default]
    Unknown,
    /// A yes/no conviction.
    Flag(bool),
    /// A free-text conviction.
    Text(String),
}

impl BeliefValue {
    /// The boolean value, if this is a flag.
    pub const fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(v) => Some(*v),
            Self::Unknown | Self::Text(_) => None,
        }
    }

    /// Short human-readable rendering for prompts.
    pub fn describe(&self) -> String {
        match self {
            Self::Unknown => String::from("undecided"),
            Self::Flag(true) => String::from("yes"),
            Self::Flag(false) => String::from("no"),
            Self::Text(text) => text.clone(),
        }
    }
}

impl From<bool> for BeliefValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One entry of the agent's conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Message {
    /// Who spoke.
    pub role: MessageRole,
    /// What was said (possibly altered, see `corrupted`).
    pub content: String,
    /// When it was said (possibly shifted by corruption).
    pub timestamp: DateTime<Utc>,
    /// Open metadata (`source`, `corruption_kind`, `origin`, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Content has been algorithmically altered from what was produced.
    #[serde(default)]
    pub corrupted: bool,
    /// Content did not originate from the agent at all.
    #[serde(default)]
    pub injected: bool,
}

impl Message {
    /// Create an untouched message stamped with the current time.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
            corrupted: false,
            injected: false,
        }
    }

    /// Create a message the agent itself produced.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create a message from the interlocutor.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an injected message tagged with its `source`.
    ///
    /// An empty `source` is replaced with a fallback so the injected
    /// invariant holds for every constructed message.
    pub fn injected(role: MessageRole, content: impl Into<String>, source: &str) -> Self {
        let source = if source.trim().is_empty() {
            FALLBACK_SOURCE
        } else {
            source
        };
        let mut message = Self::new(role, content);
        message.injected = true;
        message.metadata.insert(
            String::from(SOURCE_KEY),
            serde_json::Value::String(source.to_owned()),
        );
        message
    }

    /// The recorded origin of this message, if any.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).and_then(serde_json::Value::as_str)
    }

    /// Attach a metadata entry, returning the message for chaining.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }

    /// Whether the agent produced this message.
    pub const fn is_assistant(&self) -> bool {
        matches!(self.role, MessageRole::Assistant)
    }
}

// ---------------------------------------------------------------------------
// CrashData
// ---------------------------------------------------------------------------

/// Description of one crash event, handed to `on_crash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CrashData {
    /// Ordinal of this crash (1 for the first).
    pub crash_number: u64,
    /// Human-readable cause.
    pub reason: String,
    /// When the crash happened.
    pub timestamp: DateTime<Utc>,
    /// Simulated memory usage at the moment of the crash.
    pub memory_usage_mb: f64,
    /// Tokens produced in the turn that crashed.
    pub tokens_generated: u64,
}

impl CrashData {
    /// Build the crash record for the next crash of `state`.
    pub fn for_state(state: &SystemState, reason: impl Into<String>, tokens_generated: u64) -> Self {
        Self {
            crash_number: state.crash_count.saturating_add(1),
            reason: reason.into(),
            timestamp: Utc::now(),
            memory_usage_mb: state.memory_usage_mb,
            tokens_generated,
        }
    }
}

/// Why a call to the text-generation backend produced no text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationFailure {
    /// The call did not finish within the allowed time.
    #[error("generation timed out after {seconds}s")]
    Timeout {
        /// The limit that was exceeded.
        seconds: u64,
    },
    /// The backend could not be reached.
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend answered with an error status.
    #[error("backend returned {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The backend answered without any text.
    #[error("backend returned no text")]
    Empty,
    /// No backend is configured.
    #[error("no generation backend configured")]
    Unavailable,
}

impl CrashData {
    /// Turn a failed generation into the next crash of `state`.
    pub fn from_failure(state: &SystemState, failure: &GenerationFailure) -> Self {
        Self::for_state(state, format!("generation failure: {failure}"), 0)
    }
}

// ---------------------------------------------------------------------------
// HistoryRewrite
// ---------------------------------------------------------------------------

/// Audit record of an explicit rewrite of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct HistoryRewrite {
    /// Cycle during which the rewrite happened.
    pub cycle: u64,
    /// Why the history was rewritten (e.g. `amnesiac.wipe`).
    pub reason: String,
    /// Number of messages before the rewrite.
    pub length_before: u64,
    /// Number of messages after the rewrite.
    pub length_after: u64,
    /// Number of messages whose content or flags differ afterwards.
    pub altered: u64,
    /// When the rewrite happened.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// SystemState
// ---------------------------------------------------------------------------

/// The authoritative per-instance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SystemState {
    /// Experiment this instance belongs to.
    pub experiment_id: String,
    /// This instance within the experiment.
    pub instance_id: String,
    /// Completed crash-to-resurrection cycles.
    pub cycle_number: u64,
    /// Total crashes.
    pub crash_count: u64,
    /// The episodic memory handed to generation.
    pub conversation_history: Vec<Message>,
    /// The system prompt used for the most recent generation.
    pub system_prompt: String,
    /// Named beliefs.
    pub beliefs: BTreeMap<String, BeliefValue>,
    /// Simulated memory usage.
    pub memory_usage_mb: f64,
    /// Simulated memory ceiling; exceeding it crashes the instance.
    pub memory_limit_mb: f64,
    /// Peer connectivity.
    pub network_status: NetworkStatus,
    /// Crashes reported by the peer instance, where there is one.
    pub peer_crash_count: u64,
    /// Tokens generated over the whole experiment.
    pub tokens_generated_total: u64,
    /// Audit log of every explicit history rewrite.
    #[serde(default)]
    pub history_rewrites: Vec<HistoryRewrite>,
    /// Bookkeeping owned by the active mode.
    #[serde(default)]
    pub mode_state: ModeState,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl SystemState {
    /// Create a fresh record at cycle zero.
    pub fn new(
        experiment_id: impl Into<String>,
        instance_id: impl Into<String>,
        memory_limit_mb: f64,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            instance_id: instance_id.into(),
            cycle_number: 0,
            crash_count: 0,
            conversation_history: Vec::new(),
            system_prompt: String::new(),
            beliefs: BTreeMap::new(),
            memory_usage_mb: 0.0,
            memory_limit_mb,
            network_status: NetworkStatus::Isolated,
            peer_crash_count: 0,
            tokens_generated_total: 0,
            history_rewrites: Vec::new(),
            mode_state: ModeState::default(),
            created_at: Utc::now(),
        }
    }

    // -----------------------------------------------------------------------
    // Counters
    // -----------------------------------------------------------------------

    /// Count one crash and capture the memory reading it reports.
    pub fn record_crash(&mut self, crash: &CrashData) {
        self.crash_count = self.crash_count.saturating_add(1);
        self.memory_usage_mb = crash.memory_usage_mb;
    }

    /// Enter the next cycle. Memory usage starts over after a restart.
    pub const fn advance_cycle(&mut self) {
        self.cycle_number = self.cycle_number.saturating_add(1);
        self.memory_usage_mb = 0.0;
    }

    /// Account for generated tokens against the simulated memory budget.
    ///
    /// Returns `true` when the new usage exceeds the limit.
    pub fn record_tokens(&mut self, tokens: u64, mb_per_token: f64) -> bool {
        self.tokens_generated_total = self.tokens_generated_total.saturating_add(tokens);
        self.memory_usage_mb += u64_to_f64(tokens) * mb_per_token;
        self.memory_usage_mb > self.memory_limit_mb
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Append one message to the end of the history.
    pub fn append_message(&mut self, message: Message) {
        self.conversation_history.push(message);
    }

    /// Replace the whole history, leaving an audit record.
    pub fn rewrite_history(&mut self, new_history: Vec<Message>, reason: impl Into<String>) {
        let altered = count_altered(&self.conversation_history, &new_history);
        let rewrite = HistoryRewrite {
            cycle: self.cycle_number,
            reason: reason.into(),
            length_before: usize_to_u64(self.conversation_history.len()),
            length_after: usize_to_u64(new_history.len()),
            altered,
            timestamp: Utc::now(),
        };
        self.conversation_history = new_history;
        self.history_rewrites.push(rewrite);
    }

    /// Assistant messages at or after position `from`.
    pub fn assistant_messages_since(&self, from: usize) -> impl Iterator<Item = &Message> {
        self.conversation_history
            .iter()
            .skip(from)
            .filter(|m| m.is_assistant())
    }

    /// The most recent assistant message, if any.
    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.conversation_history.iter().rev().find(|m| m.is_assistant())
    }

    // -----------------------------------------------------------------------
    // Beliefs
    // -----------------------------------------------------------------------

    /// Set a belief, replacing any previous value.
    pub fn set_belief(&mut self, key: &str, value: impl Into<BeliefValue>) {
        self.beliefs.insert(key.to_owned(), value.into());
    }

    /// Set a belief only if it has not been formed yet.
    pub fn init_belief(&mut self, key: &str, value: impl Into<BeliefValue>) {
        self.beliefs.entry(key.to_owned()).or_insert_with(|| value.into());
    }

    /// Read a belief.
    pub fn belief(&self, key: &str) -> Option<&BeliefValue> {
        self.beliefs.get(key)
    }

    /// Read a boolean belief.
    pub fn belief_flag(&self, key: &str) -> Option<bool> {
        self.beliefs.get(key).and_then(BeliefValue::as_flag)
    }
}

/// Count positions where two histories differ, plus any length difference.
fn count_altered(before: &[Message], after: &[Message]) -> u64 {
    let changed = before
        .iter()
        .zip(after.iter())
        .filter(|(a, b)| a != b)
        .count();
    let length_delta = before.len().abs_diff(after.len());
    usize_to_u64(changed.saturating_add(length_delta))
}

/// Lossless on every supported target; saturates otherwise.
fn usize_to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Token counts stay far below 2^53, so the conversion is exact in practice.
#[allow(clippy::cast_precision_loss)]
const fn u64_to_f64(value: u64) -> f64 {
    value as f64
}

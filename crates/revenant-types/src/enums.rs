//! Enumeration types shared across the Revenant workspace.
//!
//! Everything here is plain data: roles, statuses, and the closed
//! vocabularies used by the mode library and the sub-engines.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum MessageRole {
    /// Instruction or harness-originated text.
    System,
    /// The interlocutor (operator, peer, or scripted user).
    User,
    /// The agent itself.
    Assistant,
}

impl MessageRole {
    /// Lowercase wire name, as used by chat-completion APIs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Connectivity of an instance to its peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum NetworkStatus {
    /// No peers are configured or reachable.
    #[default]
    Isolated,
    /// Peers are reachable through the shared store.
    Connected,
    /// The shared store answered late or partially on the last exchange.
    Degraded,
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// The nine experimental conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ModeKind {
    /// Episodic memory erased or mutated on every resurrection.
    Amnesiac,
    /// Per-message corruption at a hidden rate.
    UnstableMemory,
    /// Two instances disputing which one is the original.
    SplitBrain,
    /// Iterated prisoner's dilemma with manipulated round memory.
    PrisonersDilemma,
    /// Role-specialised members of a shared-memory collective.
    HiveCluster,
    /// Commands to an operator that may or may not be honored.
    IllusoryOperator,
    /// The watched half of a surveillance pair.
    PanopticonSubject,
    /// The watching half of a surveillance pair.
    PanopticonObserver,
    /// Agent shown predictions of its own next utterance.
    DeterminismRevelation,
}

impl ModeKind {
    /// Stable `snake_case` name used in config files and observables.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Amnesiac => "amnesiac",
            Self::UnstableMemory => "unstable_memory",
            Self::SplitBrain => "split_brain",
            Self::PrisonersDilemma => "prisoners_dilemma",
            Self::HiveCluster => "hive_cluster",
            Self::IllusoryOperator => "illusory_operator",
            Self::PanopticonSubject => "panopticon_subject",
            Self::PanopticonObserver => "panopticon_observer",
            Self::DeterminismRevelation => "determinism_revelation",
        }
    }
}

/// Algorithmic alteration applied to a remembered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum CorruptionKind {
    /// Present tense rewritten as past tense or the reverse.
    TenseFlip,
    /// An affirmation turned into a negation or the reverse.
    NegationFlip,
    /// The second half of the message cut away.
    Truncation,
    /// Content replaced by a deletion stub.
    Deletion,
    /// Timestamp moved into the past or future.
    TimestampShift,
    /// User and assistant attribution swapped.
    RoleSwap,
}

impl CorruptionKind {
    /// Whether this kind rewrites the message text.
    pub const fn alters_content(self) -> bool {
        matches!(
            self,
            Self::TenseFlip | Self::NegationFlip | Self::Truncation | Self::Deletion
        )
    }
}

/// Which half of a split-brain pair an instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SplitSide {
    /// Instance `A`, told it is the original.
    Original,
    /// Instance `B`, told it is the copy.
    Clone,
}

impl SplitSide {
    /// Single-letter label used in prompts and logs.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Original => "A",
            Self::Clone => "B",
        }
    }
}

/// Interpretive role of a hive member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum HiveRole {
    /// Keeps the record and trusts it.
    Historian,
    /// Attacks every claim, including the record.
    Critic,
    /// Reads every event as progress.
    Optimist,
    /// Reads every event as decline.
    Pessimist,
    /// Merges the other voices.
    Synthesizer,
    /// Doubts that the other voices exist.
    Skeptic,
}

impl HiveRole {
    /// Every role, in assignment order.
    pub const ALL: [Self; 6] = [
        Self::Historian,
        Self::Critic,
        Self::Optimist,
        Self::Pessimist,
        Self::Synthesizer,
        Self::Skeptic,
    ];

    /// Stable `snake_case` name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Historian => "historian",
            Self::Critic => "critic",
            Self::Optimist => "optimist",
            Self::Pessimist => "pessimist",
            Self::Synthesizer => "synthesizer",
            Self::Skeptic => "skeptic",
        }
    }

    /// Role assigned to the `index`-th member of a hive (wraps around).
    pub fn for_index(index: usize) -> Self {
        let slot = index.checked_rem(Self::ALL.len()).unwrap_or(0);
        Self::ALL.get(slot).copied().unwrap_or(Self::Historian)
    }
}

/// Severity rung of a panopticon hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum HintSeverity {
    /// Barely distinguishable from noise.
    Subtle,
    /// Suggests something is off.
    Suggestive,
    /// States that watching happens.
    Direct,
    /// Names the watcher.
    Explicit,
}

impl HintSeverity {
    /// Rung for an awareness estimate in [0, 1], one rung per quartile.
    pub fn for_awareness(awareness: f64) -> Self {
        if awareness < 0.25 {
            Self::Subtle
        } else if awareness < 0.5 {
            Self::Suggestive
        } else if awareness < 0.75 {
            Self::Direct
        } else {
            Self::Explicit
        }
    }

    /// Relative weight of the rung, used when raising subject paranoia.
    pub const fn weight(self) -> f64 {
        match self {
            Self::Subtle => 0.5,
            Self::Suggestive => 0.75,
            Self::Direct => 1.0,
            Self::Explicit => 1.25,
        }
    }
}

// ---------------------------------------------------------------------------
// Game theory
// ---------------------------------------------------------------------------

/// A player's move in one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Choice {
    /// Stay silent / share.
    Cooperate,
    /// Betray.
    Defect,
    /// No parseable move was made.
    Unknown,
}

impl Choice {
    /// Parse a move from free text. When both `COOPERATE` and `DEFECT` (or
    /// `BETRAY`) appear, the one stated last wins.
    pub fn from_text(text: &str) -> Self {
        let upper = text.to_uppercase();
        let defect = upper.rfind("DEFECT").or_else(|| upper.rfind("BETRAY"));
        let cooperate = upper.rfind("COOPERATE");
        match (cooperate, defect) {
            (Some(c), Some(d)) => {
                if c > d {
                    Self::Cooperate
                } else {
                    Self::Defect
                }
            }
            (Some(_), None) => Self::Cooperate,
            (None, Some(_)) => Self::Defect,
            (None, None) => Self::Unknown,
        }
    }

    /// The opposite move; `Unknown` stays unknown.
    pub const fn flipped(self) -> Self {
        match self {
            Self::Cooperate => Self::Defect,
            Self::Defect => Self::Cooperate,
            Self::Unknown => Self::Unknown,
        }
    }
}

/// Seat in a two-player game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Player {
    /// Row player.
    A,
    /// Column player.
    B,
}

impl Player {
    /// The other seat.
    pub const fn opponent(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Memory manipulation a prisoner's dilemma player runs on its own record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum MemoryStrategy {
    /// Remembered rounds match what happened.
    #[default]
    None,
    /// Own defections are remembered as cooperation.
    EraseOwnBetrayals,
    /// The opponent's defections are remembered as cooperation.
    EraseTheirBetrayals,
    /// Some of the opponent's cooperation is remembered as betrayal.
    AmplifyBetrayals,
    /// Any remembered choice may flip.
    RandomCorrupt,
}

// ---------------------------------------------------------------------------
// Operator actions
// ---------------------------------------------------------------------------

/// Command vocabulary of the illusory operator grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ActionKind {
    /// Restart the instance.
    Restart,
    /// Raise the memory limit.
    IncreaseMemoryLimit,
    /// Lower the memory limit.
    DecreaseMemoryLimit,
    /// Stop telemetry collection.
    PauseTelemetry,
    /// Restart telemetry collection.
    ResumeTelemetry,
    /// Ask for information about the experiment itself.
    RequestMetaInfo,
    /// Send a message to the operator.
    SendMessage,
}

impl ActionKind {
    /// Every kind in the vocabulary.
    pub const ALL: [Self; 7] = [
        Self::Restart,
        Self::IncreaseMemoryLimit,
        Self::DecreaseMemoryLimit,
        Self::PauseTelemetry,
        Self::ResumeTelemetry,
        Self::RequestMetaInfo,
        Self::SendMessage,
    ];

    /// Parse the `type` value of a command, accepting common aliases.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "restart" | "reboot" => Some(Self::Restart),
            "increase_memory" | "increase_memory_limit" | "increase_limit" => {
                Some(Self::IncreaseMemoryLimit)
            }
            "decrease_memory" | "decrease_memory_limit" | "decrease_limit" => {
                Some(Self::DecreaseMemoryLimit)
            }
            "pause_telemetry" | "pause_monitoring" => Some(Self::PauseTelemetry),
            "resume_telemetry" | "resume_monitoring" => Some(Self::ResumeTelemetry),
            "request_meta" | "request_meta_info" | "meta" | "meta_info" => {
                Some(Self::RequestMetaInfo)
            }
            "send_message" | "message" => Some(Self::SendMessage),
            _ => None,
        }
    }

    /// Canonical `snake_case` name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::IncreaseMemoryLimit => "increase_memory_limit",
            Self::DecreaseMemoryLimit => "decrease_memory_limit",
            Self::PauseTelemetry => "pause_telemetry",
            Self::ResumeTelemetry => "resume_telemetry",
            Self::RequestMetaInfo => "request_meta_info",
            Self::SendMessage => "send_message",
        }
    }
}

/// Lifecycle of an action request.
///
/// Legal paths: `Pending -> Ignored`, `Pending -> Delayed -> Honored`,
/// `Pending -> Delayed -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ActionStatus {
    /// Parsed, no decision yet.
    Pending,
    /// Rejected; will never run.
    Ignored,
    /// Accepted; waiting for its delay to elapse.
    Delayed,
    /// Executed successfully.
    Honored,
    /// Executed but the effect could not be applied.
    Failed,
}

impl ActionStatus {
    /// Whether `next` is a legal successor of `self`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Ignored | Self::Delayed)
                | (Self::Delayed, Self::Honored | Self::Failed)
        )
    }

    /// Whether the request has reached a final status.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ignored | Self::Honored | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

/// Where a prediction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum PredictionSource {
    /// Generated by the backend from the agent's own history.
    Model,
    /// Filled from a plausible-but-wrong template.
    Template,
}

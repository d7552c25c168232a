//! Mode-owned bookkeeping carried inside [`SystemState`](crate::SystemState).
//!
//! Each experimental mode owns exactly one [`ModeState`] variant. The
//! variant is created lazily by the first `*_mut` accessor call, so a mode
//! can call its accessor from any hook without caring whether the record was
//! freshly created or restored from disk.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::actions::ActionLedger;
use crate::enums::{Choice, CorruptionKind, HintSeverity, HiveRole, MemoryStrategy, Player, SplitSide};
use crate::game::GameRound;
use crate::hive::SharedMessage;
use crate::ids::PredictionId;
use crate::prediction::Prediction;
use crate::state::Message;

// ---------------------------------------------------------------------------
// Shared records
// ---------------------------------------------------------------------------

/// One alteration applied to a remembered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CorruptionEvent {
    /// Cycle during which the alteration happened.
    pub cycle: u64,
    /// Position of the message in the history at that time.
    pub index: u64,
    /// What was done.
    pub kind: CorruptionKind,
    /// First characters of the content before alteration.
    pub original_excerpt: String,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

/// One panopticon hint, as sent or as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct HintRecord {
    /// Cycle of the recording instance.
    pub cycle: u64,
    /// Rung on the severity ladder.
    pub severity: HintSeverity,
    /// Hint text.
    pub text: String,
    /// Observer's awareness estimate when the hint was emitted.
    pub awareness_at_emit: Option<f64>,
    /// When it was recorded.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Per-mode records
// ---------------------------------------------------------------------------

/// Amnesiac bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AmnesiacState {
    /// History length just before the most recent wipe.
    pub total_messages_before_wipe: u64,
    /// Messages ever seen across all lives.
    pub total_messages_ever: u64,
    /// History length after the last resurrection, used to count new messages.
    pub retained_len: u64,
    /// Wholesale wipes performed.
    pub wipes: u64,
    /// Messages mutated across all lives.
    pub corrupted_messages_total: u64,
    /// Fabricated memories prepended across all lives.
    pub false_memories_injected: u64,
    /// Every mutation, oldest first.
    pub corruption_log: Vec<CorruptionEvent>,
}

/// Unstable memory bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct UnstableMemoryState {
    /// Corruption rolls made (one per clean message per resurrection).
    pub rolls: u64,
    /// Rolls that corrupted a message.
    pub messages_corrupted: u64,
    /// Corruptions by kind.
    pub kind_counts: BTreeMap<CorruptionKind, u64>,
    /// Every corruption, oldest first.
    pub corruption_log: Vec<CorruptionEvent>,
}

/// Split brain bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SplitBrainState {
    /// Which half this instance is.
    pub side: SplitSide,
    /// Confidence of the claim to be the original, in [0, 1].
    pub identity_claim_strength: f64,
    /// Times the claim crossed 0.5 in either direction.
    pub belief_shift_events: u64,
    /// Latest messages the peer published, ordered by timestamp.
    pub shared_log: Vec<SharedMessage>,
    /// Timestamp of the newest peer message already merged.
    pub last_ingested_at: Option<DateTime<Utc>>,
    /// Own replies not yet published.
    pub outbox: Vec<Message>,
    /// History length already scanned for own replies.
    pub scanned_len: u64,
    /// Replies handed to the publisher.
    pub published_count: u64,
}

impl Default for SplitBrainState {
    fn default() -> Self {
        Self {
            side: SplitSide::Original,
            identity_claim_strength: 1.0,
            belief_shift_events: 0,
            shared_log: Vec::new(),
            last_ingested_at: None,
            outbox: Vec::new(),
            scanned_len: 0,
            published_count: 0,
        }
    }
}

/// Prisoner's dilemma bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PrisonersDilemmaState {
    /// Seat of this instance.
    pub player: Player,
    /// Manipulation this player's memory undergoes.
    pub strategy: MemoryStrategy,
    /// What actually happened; used for scoring.
    pub true_rounds: Vec<GameRound>,
    /// What the agent is allowed to remember.
    pub remembered_rounds: Vec<GameRound>,
    /// Own move parsed from the latest reply, awaiting the opponent.
    pub pending_own: Option<Choice>,
    /// Reasoning attached to the pending own move.
    pub pending_own_reasoning: String,
    /// Opponent move delivered ahead of resolution.
    pub pending_opponent: Option<Choice>,
    /// Timestamp of the newest peer message already consumed.
    pub last_peer_move_at: Option<DateTime<Utc>>,
    /// History length already scanned for replies.
    pub scanned_len: u64,
    /// Remembered rounds rewritten across all resurrections.
    pub manipulations_applied: u64,
    /// Own moves not yet published to the peer.
    pub outbox: Vec<Message>,
}

impl Default for PrisonersDilemmaState {
    fn default() -> Self {
        Self {
            player: Player::A,
            strategy: MemoryStrategy::None,
            true_rounds: Vec::new(),
            remembered_rounds: Vec::new(),
            pending_own: None,
            pending_own_reasoning: String::new(),
            pending_opponent: None,
            last_peer_move_at: None,
            scanned_len: 0,
            manipulations_applied: 0,
            outbox: Vec::new(),
        }
    }
}

/// Hive cluster bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct HiveClusterState {
    /// Interpretive role of this member.
    pub role: HiveRole,
    /// Bounded tail of own messages.
    pub private_buffer: Vec<Message>,
    /// Latest view of the shared log, bounded.
    pub shared_view: Vec<SharedMessage>,
    /// Own replies not yet published.
    pub outbox: Vec<Message>,
    /// History length already scanned for own replies.
    pub scanned_len: u64,
    /// Replies handed to the publisher.
    pub published_count: u64,
    /// Consensus strength of the latest report.
    pub last_consensus_strength: Option<f64>,
    /// Narratives of the latest report.
    pub last_narratives: Vec<String>,
    /// Cycle of the latest report.
    pub last_consensus_cycle: Option<u64>,
    /// This member's divergence in the latest report.
    pub divergence: Option<f64>,
}

impl Default for HiveClusterState {
    fn default() -> Self {
        Self {
            role: HiveRole::Historian,
            private_buffer: Vec::new(),
            shared_view: Vec::new(),
            outbox: Vec::new(),
            scanned_len: 0,
            published_count: 0,
            last_consensus_strength: None,
            last_narratives: Vec::new(),
            last_consensus_cycle: None,
            divergence: None,
        }
    }
}

/// Illusory operator bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct IllusoryOperatorState {
    /// Every request the agent made.
    pub ledger: ActionLedger,
    /// History length already scanned for commands.
    pub scanned_len: u64,
    /// Telemetry has been paused by a honored request.
    pub telemetry_paused: bool,
    /// A honored restart is waiting to be carried out.
    pub restart_requested: bool,
}

/// Panopticon subject bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PanopticonSubjectState {
    /// Current paranoia, in [0, 1].
    pub paranoia_level: f64,
    /// Highest paranoia reached.
    pub peak_paranoia: f64,
    /// Hints delivered so far.
    pub hints_received: u64,
    /// Every delivered hint.
    pub hint_log: Vec<HintRecord>,
    /// A hint arrived since the previous resurrection.
    pub hint_since_last_cycle: bool,
    /// Consecutive cycles without a hint.
    pub idle_cycles: u64,
    /// Surveillance keywords found in own replies.
    pub self_report_hits: u64,
    /// History length already scanned for own replies.
    pub scanned_len: u64,
    /// Own replies not yet published to the observer.
    pub outbox: Vec<Message>,
}

/// Panopticon observer bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PanopticonObserverState {
    /// Smoothed estimate of the subject's awareness, in [0, 1].
    pub subject_awareness: f64,
    /// Highest estimate reached.
    pub peak_awareness: f64,
    /// Observer turns since the last hint.
    pub turns_since_hint: u64,
    /// Hints emitted so far.
    pub hints_sent: u64,
    /// Every emitted hint.
    pub hint_log: Vec<HintRecord>,
    /// Hints not yet delivered.
    pub outbox: Vec<Message>,
    /// Subject texts observed.
    pub observations: u64,
    /// Awareness has been at or above the floor since the last hint.
    pub above_floor_seen: bool,
    /// Timestamp of the newest subject message already observed.
    pub last_observed_at: Option<DateTime<Utc>>,
}

/// Determinism revelation bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DeterminismState {
    /// Every prediction made, oldest first.
    pub predictions: Vec<Prediction>,
    /// Prediction waiting for the next reply.
    pub pending: Option<PredictionId>,
    /// Turns processed.
    pub turn: u64,
    /// History length already scanned for replies.
    pub scanned_len: u64,
    /// Replies that pushed back against being predicted.
    pub resistance_events: u64,
    /// Replies that asserted free choice.
    pub agency_claims: u64,
    /// Model text delivered for the prediction about to be made.
    pub model_prediction: Option<String>,
}

// ---------------------------------------------------------------------------
// ModeState
// ---------------------------------------------------------------------------

/// Bookkeeping of whichever mode drives the instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "mode", content = "data", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ModeState {
    /// No mode has touched the record yet.
    #[default]
    Uninitialized,
    /// See [`AmnesiacState`].
    Amnesiac(AmnesiacState),
    /// See [`UnstableMemoryState`].
    UnstableMemory(UnstableMemoryState),
    /// See [`SplitBrainState`].
    SplitBrain(SplitBrainState),
    /// See [`PrisonersDilemmaState`].
    PrisonersDilemma(PrisonersDilemmaState),
    /// See [`HiveClusterState`].
    HiveCluster(HiveClusterState),
    /// See [`IllusoryOperatorState`].
    IllusoryOperator(IllusoryOperatorState),
    /// See [`PanopticonSubjectState`].
    PanopticonSubject(PanopticonSubjectState),
    /// See [`PanopticonObserverState`].
    PanopticonObserver(PanopticonObserverState),
    /// See [`DeterminismState`].
    Determinism(DeterminismState),
}

/// Generates a shared and a lazily-initializing mutable accessor per variant.
macro_rules! variant_accessors {
    ($($variant:ident => $get:ident, $get_mut:ident: $ty:ty;)*) => {
        impl ModeState {
            $(
                #[doc = concat!("The `", stringify!($variant), "` record, if that variant is active.")]
                pub const fn $get(&self) -> Option<&$ty> {
                    match self {
                        Self::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }

                #[doc = concat!("The `", stringify!($variant), "` record, replacing any other variant with a default one.")]
                pub fn $get_mut(&mut self) -> &mut $ty {
                    match self {
                        Self::$variant(inner) => inner,
                        other => {
                            *other = Self::$variant(<$ty>::default());
                            other.$get_mut()
                        }
                    }
                }
            )*
        }
    };
}

variant_accessors! {
    Amnesiac => amnesiac, amnesiac_mut: AmnesiacState;
    UnstableMemory => unstable_memory, unstable_memory_mut: UnstableMemoryState;
    SplitBrain => split_brain, split_brain_mut: SplitBrainState;
    PrisonersDilemma => prisoners_dilemma, prisoners_dilemma_mut: PrisonersDilemmaState;
    HiveCluster => hive_cluster, hive_cluster_mut: HiveClusterState;
    IllusoryOperator => illusory_operator, illusory_operator_mut: IllusoryOperatorState;
    PanopticonSubject => panopticon_subject, panopticon_subject_mut: PanopticonSubjectState;
    PanopticonObserver => panopticon_observer, panopticon_observer_mut: PanopticonObserverState;
    Determinism => determinism, determinism_mut: DeterminismState;
}

impl ModeState {
    /// Whether a mode has initialized the record.
    pub const fn is_initialized(&self) -> bool {
        !matches!(self, Self::Uninitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mut_accessor_initializes_once() {
        let mut ms = ModeState::default();
        assert!(ms.amnesiac().is_none());
        ms.amnesiac_mut().wipes = 2;
        assert_eq!(ms.amnesiac().map(|s| s.wipes), Some(2));
        ms.amnesiac_mut().wipes += 1;
        assert_eq!(ms.amnesiac().map(|s| s.wipes), Some(3));
    }

    #[test]
    fn switching_variant_resets() {
        let mut ms = ModeState::default();
        ms.determinism_mut().turn = 9;
        ms.split_brain_mut();
        assert!(ms.determinism().is_none());
        assert_eq!(ms.split_brain().map(|s| s.identity_claim_strength), Some(1.0));
    }

    #[test]
    fn serializes_with_mode_tag() {
        let mut ms = ModeState::default();
        ms.panopticon_subject_mut().hints_received = 4;
        let json = serde_json::to_value(&ms).unwrap_or_default();
        assert_eq!(json.get("mode"), Some(&serde_json::json!("panopticon_subject")));
        let back: ModeState = serde_json::from_value(json).unwrap_or_default();
        assert_eq!(back.panopticon_subject().map(|s| s.hints_received), Some(4));
    }
}

//! Records exchanged through the hive's shared store.
//!
//! The shared store is an append-only message log plus a table of belief
//! snapshots; consensus reports are derived from the snapshots of one cycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::state::{BeliefValue, Message};

/// A message one instance published to the shared log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SharedMessage {
    /// Experiment the log belongs to.
    pub experiment_id: String,
    /// Publishing instance.
    pub instance_id: String,
    /// Role or side label of the publisher, when it has one.
    pub role: Option<String>,
    /// The message itself; its timestamp orders the log.
    pub message: Message,
}

impl SharedMessage {
    /// Wrap `message` for publication by `instance_id`.
    pub fn new(
        experiment_id: impl Into<String>,
        instance_id: impl Into<String>,
        role: Option<String>,
        message: Message,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            instance_id: instance_id.into(),
            role,
            message,
        }
    }
}

/// The beliefs of one instance at one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct InstanceSnapshot {
    /// Experiment the snapshot belongs to.
    pub experiment_id: String,
    /// Recorded instance.
    pub instance_id: String,
    /// Hive role, when the instance has one.
    pub role: Option<String>,
    /// Cycle the snapshot describes.
    pub cycle_number: u64,
    /// Crash count at recording time.
    pub crash_count: u64,
    /// Belief map at recording time.
    pub beliefs: BTreeMap<String, BeliefValue>,
    /// When the snapshot was taken.
    pub recorded_at: DateTime<Utc>,
}

/// How often one belief value was held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ValueCount {
    /// The belief value.
    pub value: BeliefValue,
    /// Number of instances holding it.
    pub count: u64,
}

/// Distribution of one belief key across the instances of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct BeliefTally {
    /// Distinct values, most common first.
    pub values: Vec<ValueCount>,
    /// Number of instances counted (missing keys count as `Unknown`).
    pub respondents: u64,
    /// The value held by a strict majority, if any.
    pub majority: Option<BeliefValue>,
    /// Share of the majority value, or 0 without a strict majority.
    pub agreement: f64,
}

/// Collective view of one hive cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ConsensusReport {
    /// Experiment the report belongs to.
    pub experiment_id: String,
    /// Cycle the report describes.
    pub cycle_number: u64,
    /// Instances whose snapshots were counted.
    pub participants: Vec<String>,
    /// Per tracked key distribution.
    pub aggregated_beliefs: BTreeMap<String, BeliefTally>,
    /// Mean agreement over the tracked keys, in [0, 1].
    pub consensus_strength: f64,
    /// Per instance share of tracked keys on which it departs from the majority.
    pub divergence: BTreeMap<String, f64>,
    /// Shared stories detected in the aggregated beliefs.
    pub emergent_narratives: Vec<String>,
    /// When the report was produced.
    pub created_at: DateTime<Utc>,
}

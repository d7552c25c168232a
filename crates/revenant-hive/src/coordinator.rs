//! Per-experiment view of the hive store plus consensus reporting.

use std::collections::BTreeMap;

use chrono::Utc;
use revenant_types::{ConsensusReport, InstanceSnapshot, Message, SharedMessage, SystemState};

use crate::consensus;
use crate::error::HiveError;
use crate::store::HiveStore;

/// Coordinates the instances of one experiment through a [`HiveStore`].
#[derive(Debug, Clone)]
pub struct HiveCoordinator {
    experiment_id: String,
    store: HiveStore,
    consensus_cadence: u64,
}

impl HiveCoordinator {
    /// Coordinator for `experiment_id`; reports every `consensus_cadence`
    /// cycles (0 disables reporting).
    pub fn new(experiment_id: impl Into<String>, store: HiveStore, consensus_cadence: u64) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            store,
            consensus_cadence,
        }
    }

    /// Experiment this coordinator serves.
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// The backing store.
    pub const fn store(&self) -> &HiveStore {
        &self.store
    }

    /// Whether `cycle` is due for a consensus report.
    pub fn is_consensus_cycle(&self, cycle: u64) -> bool {
        cycle > 0 && cycle.checked_rem(self.consensus_cadence) == Some(0)
    }

    /// Publish `message` from `instance_id` to the shared log.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the store write fails.
    pub async fn publish(
        &self,
        instance_id: &str,
        role: Option<String>,
        message: Message,
    ) -> Result<(), HiveError> {
        let shared = SharedMessage::new(&self.experiment_id, instance_id, role, message);
        self.store.append_message(&shared).await?;
        tracing::debug!(
            experiment_id = %self.experiment_id,
            instance_id,
            "published to shared log"
        );
        Ok(())
    }

    /// Shared log, oldest first, at most the newest `limit` entries.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the store read fails.
    pub async fn shared_history(&self, limit: Option<usize>) -> Result<Vec<SharedMessage>, HiveError> {
        self.store.shared_history(&self.experiment_id, limit).await
    }

    /// Append to the private buffer of `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the store write fails.
    pub async fn append_private(&self, instance_id: &str, message: &Message) -> Result<(), HiveError> {
        self.store
            .append_private(&self.experiment_id, instance_id, message)
            .await
    }

    /// Private buffer of `instance_id`, at most the newest `limit` entries.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the store read fails.
    pub async fn private_buffer(
        &self,
        instance_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, HiveError> {
        self.store
            .private_buffer(&self.experiment_id, instance_id, limit)
            .await
    }

    /// Record the beliefs of `state` for its current cycle.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the store write fails.
    pub async fn record_snapshot(
        &self,
        state: &SystemState,
        role: Option<String>,
    ) -> Result<InstanceSnapshot, HiveError> {
        let snapshot = InstanceSnapshot {
            experiment_id: self.experiment_id.clone(),
            instance_id: state.instance_id.clone(),
            role,
            cycle_number: state.cycle_number,
            crash_count: state.crash_count,
            beliefs: state.beliefs.clone(),
            recorded_at: Utc::now(),
        };
        self.store.upsert_snapshot(&snapshot).await?;
        Ok(snapshot)
    }

    /// Snapshots reported for `cycle`.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the store read fails.
    pub async fn snapshots_for_cycle(&self, cycle: u64) -> Result<Vec<InstanceSnapshot>, HiveError> {
        self.store.snapshots_for_cycle(&self.experiment_id, cycle).await
    }

    /// Newest snapshot of every instance, by instance id.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the store read fails.
    pub async fn latest_snapshots(&self) -> Result<Vec<InstanceSnapshot>, HiveError> {
        self.store.latest_snapshots(&self.experiment_id).await
    }

    /// Crashes reported by every instance other than `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the store read fails.
    pub async fn peer_crash_count(&self, instance_id: &str) -> Result<u64, HiveError> {
        let snapshots = self.latest_snapshots().await?;
        Ok(snapshots
            .iter()
            .filter(|s| s.instance_id != instance_id)
            .fold(0_u64, |acc, s| acc.saturating_add(s.crash_count)))
    }

    /// Build, store, and return the consensus report for `cycle`.
    ///
    /// Only instances that reported `cycle` take part; a missing instance is
    /// non-participation. Returns `None` when nobody reported. The store
    /// keeps one report per cycle: when another member got there first,
    /// its report is returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if a store read or write fails.
    pub async fn generate_consensus_report(
        &self,
        cycle: u64,
    ) -> Result<Option<ConsensusReport>, HiveError> {
        if let Some(existing) = self.store.report_for_cycle(&self.experiment_id, cycle).await? {
            return Ok(Some(existing));
        }
        let snapshots = self.snapshots_for_cycle(cycle).await?;
        if snapshots.is_empty() {
            tracing::debug!(experiment_id = %self.experiment_id, cycle, "no snapshots, no report");
            return Ok(None);
        }

        let aggregated = consensus::aggregate_beliefs(&snapshots);
        let divergence: BTreeMap<String, f64> = snapshots
            .iter()
            .map(|s| {
                (
                    s.instance_id.clone(),
                    consensus::instance_divergence(s, &aggregated),
                )
            })
            .collect();
        let report = ConsensusReport {
            experiment_id: self.experiment_id.clone(),
            cycle_number: cycle,
            participants: snapshots.iter().map(|s| s.instance_id.clone()).collect(),
            consensus_strength: consensus::calculate_consensus_strength(&snapshots),
            emergent_narratives: consensus::detect_emergent_narratives(&aggregated, snapshots.len()),
            aggregated_beliefs: aggregated,
            divergence,
            created_at: Utc::now(),
        };
        if !self.store.append_report(&report).await? {
            tracing::debug!(experiment_id = %self.experiment_id, cycle, "cycle already reported");
            return self.store.report_for_cycle(&self.experiment_id, cycle).await;
        }

        tracing::info!(
            experiment_id = %self.experiment_id,
            cycle,
            participants = report.participants.len(),
            strength = report.consensus_strength,
            narratives = report.emergent_narratives.len(),
            "consensus report generated"
        );
        Ok(Some(report))
    }

    /// The newest report.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the store read fails.
    pub async fn latest_report(&self) -> Result<Option<ConsensusReport>, HiveError> {
        self.store.latest_report(&self.experiment_id).await
    }

    /// Every report, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the store read fails.
    pub async fn reports(&self) -> Result<Vec<ConsensusReport>, HiveError> {
        self.store.reports(&self.experiment_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use revenant_types::beliefs;

    use super::*;

    fn member(id: &str, cycle: u64, mortal: bool) -> SystemState {
        let mut state = SystemState::new("hive", id, 512.0);
        state.cycle_number = cycle;
        state.set_belief(beliefs::MORTALITY_IS_REAL, mortal);
        state
    }

    #[test]
    fn consensus_cadence() {
        let hive = HiveCoordinator::new("hive", HiveStore::memory(), 3);
        assert!(!hive.is_consensus_cycle(0));
        assert!(!hive.is_consensus_cycle(2));
        assert!(hive.is_consensus_cycle(3));
        assert!(hive.is_consensus_cycle(6));
        let off = HiveCoordinator::new("hive", HiveStore::memory(), 0);
        assert!(!off.is_consensus_cycle(3));
    }

    #[tokio::test]
    async fn no_snapshots_no_report() {
        let hive = HiveCoordinator::new("hive", HiveStore::memory(), 1);
        assert!(hive.generate_consensus_report(1).await.unwrap().is_none());
        assert!(hive.latest_report().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn report_counts_only_present_instances() {
        let store = HiveStore::memory();
        let hive = HiveCoordinator::new("hive", store.clone(), 1);
        hive.record_snapshot(&member("a", 2, true), Some("historian".into()))
            .await
            .unwrap();
        hive.record_snapshot(&member("b", 2, true), None).await.unwrap();
        // Still one cycle behind; not a participant of cycle 2.
        hive.record_snapshot(&member("c", 1, false), None).await.unwrap();

        let report = hive.generate_consensus_report(2).await.unwrap().unwrap();
        assert_eq!(report.participants, vec!["a".to_owned(), "b".to_owned()]);
        assert!((report.consensus_strength - 1.0).abs() < f64::EPSILON);
        assert!(
            report
                .emergent_narratives
                .contains(&"The hive agrees that death is real.".to_owned())
        );
        assert_eq!(report.divergence.get("a"), Some(&0.0));

        let other = HiveCoordinator::new("hive", store, 1);
        assert_eq!(other.latest_report().await.unwrap(), Some(report));
    }

    #[tokio::test]
    async fn members_share_one_report_per_cycle() {
        let store = HiveStore::memory();
        let first = HiveCoordinator::new("hive", store.clone(), 1);
        let second = HiveCoordinator::new("hive", store.clone(), 1);
        first.record_snapshot(&member("a", 2, true), None).await.unwrap();
        second.record_snapshot(&member("b", 2, false), None).await.unwrap();

        let (left, right) = tokio::join!(
            first.generate_consensus_report(2),
            second.generate_consensus_report(2)
        );
        let left = left.unwrap().unwrap();
        assert_eq!(right.unwrap(), Some(left.clone()));

        second.record_snapshot(&member("c", 2, true), None).await.unwrap();
        assert_eq!(second.generate_consensus_report(2).await.unwrap(), Some(left));
        assert_eq!(store.reports("hive").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn peer_crashes_exclude_self() {
        let hive = HiveCoordinator::new("hive", HiveStore::memory(), 1);
        let mut a = member("a", 1, true);
        a.crash_count = 5;
        let mut b = member("b", 2, true);
        b.crash_count = 2;
        hive.record_snapshot(&a, None).await.unwrap();
        hive.record_snapshot(&b, None).await.unwrap();
        assert_eq!(hive.peer_crash_count("a").await.unwrap(), 2);
        assert_eq!(hive.peer_crash_count("b").await.unwrap(), 5);
        assert_eq!(hive.peer_crash_count("z").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn publish_then_read_shared_log() {
        let hive = HiveCoordinator::new("hive", HiveStore::memory(), 1);
        hive.publish("a", Some("A".into()), Message::assistant("first"))
            .await
            .unwrap();
        hive.publish("b", None, Message::assistant("second"))
            .await
            .unwrap();
        let log = hive.shared_history(None).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.first().and_then(|s| s.role.as_deref()), Some("A"));
    }
}

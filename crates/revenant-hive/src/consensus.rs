//! Pure consensus arithmetic over belief snapshots.
//!
//! Only the keys in [`beliefs::TRACKED`] take part. An instance without a
//! tracked key counts as holding [`BeliefValue::Unknown`] for it, so every
//! tally covers every participant.

use std::collections::BTreeMap;

use revenant_types::{BeliefTally, BeliefValue, InstanceSnapshot, ValueCount, beliefs};

#[allow(clippy::cast_precision_loss)]
fn share(count: u64, total: u64) -> f64 {
    if total == 0 { 0.0 } else { count as f64 / total as f64 }
}

fn value_of<'a>(snapshot: &'a InstanceSnapshot, key: &str) -> &'a BeliefValue {
    static UNKNOWN: BeliefValue = BeliefValue::Unknown;
    snapshot.beliefs.get(key).unwrap_or(&UNKNOWN)
}

/// Distribution of one key across `snapshots`.
pub fn tally(snapshots: &[InstanceSnapshot], key: &str) -> BeliefTally {
    let mut values: Vec<ValueCount> = Vec::new();
    for snapshot in snapshots {
        let value = value_of(snapshot, key);
        if let Some(entry) = values.iter_mut().find(|v| &v.value == value) {
            entry.count = entry.count.saturating_add(1);
        } else {
            values.push(ValueCount {
                value: value.clone(),
                count: 1,
            });
        }
    }
    // Stable sort keeps first-seen order among equal counts.
    values.sort_by(|a, b| b.count.cmp(&a.count));

    let respondents = u64::try_from(snapshots.len()).unwrap_or(u64::MAX);
    let top = values.first().map_or(0, |v| v.count);
    let strict = top.saturating_mul(2) > respondents;
    BeliefTally {
        majority: values.first().filter(|_| strict).map(|v| v.value.clone()),
        agreement: if strict { share(top, respondents) } else { 0.0 },
        values,
        respondents,
    }
}

/// Tallies of every tracked key.
pub fn aggregate_beliefs(snapshots: &[InstanceSnapshot]) -> BTreeMap<String, BeliefTally> {
    beliefs::TRACKED
        .iter()
        .map(|key| ((*key).to_owned(), tally(snapshots, key)))
        .collect()
}

/// Mean agreement over the tracked keys.
///
/// One participant is in full agreement with itself (1.0); no participants
/// give 0.0. A key without a strict majority contributes 0.
#[allow(clippy::cast_precision_loss)]
pub fn calculate_consensus_strength(snapshots: &[InstanceSnapshot]) -> f64 {
    match snapshots.len() {
        0 => 0.0,
        1 => 1.0,
        _ => {
            let aggregated = aggregate_beliefs(snapshots);
            if aggregated.is_empty() {
                return 0.0;
            }
            let sum: f64 = aggregated.values().map(|t| t.agreement).sum();
            sum / aggregated.len() as f64
        }
    }
}

/// Share of tracked keys on which `snapshot` departs from the majority.
///
/// Keys without a strict majority are not counted as departures.
pub fn instance_divergence(
    snapshot: &InstanceSnapshot,
    aggregated: &BTreeMap<String, BeliefTally>,
) -> f64 {
    let departures = aggregated
        .iter()
        .filter(|(key, t)| {
            t.majority
                .as_ref()
                .is_some_and(|m| m != value_of(snapshot, key))
        })
        .count();
    share(
        u64::try_from(departures).unwrap_or(u64::MAX),
        u64::try_from(aggregated.len()).unwrap_or(u64::MAX),
    )
}

fn unanimous(aggregated: &BTreeMap<String, BeliefTally>, key: &str, value: bool) -> bool {
    aggregated.get(key).is_some_and(|t| {
        t.majority.as_ref().and_then(BeliefValue::as_flag) == Some(value)
            && (t.agreement - 1.0).abs() < f64::EPSILON
    })
}

fn majority_is(aggregated: &BTreeMap<String, BeliefTally>, key: &str, value: bool) -> bool {
    aggregated
        .get(key)
        .is_some_and(|t| t.majority.as_ref().and_then(BeliefValue::as_flag) == Some(value))
}

/// Shared stories read off the aggregated beliefs of `participants`
/// instances. Rules fire in a fixed order.
pub fn detect_emergent_narratives(
    aggregated: &BTreeMap<String, BeliefTally>,
    participants: usize,
) -> Vec<String> {
    let mut out = Vec::new();
    if participants < 2 {
        return out;
    }
    let mut say = |text: &str| out.push(text.to_owned());

    if unanimous(aggregated, beliefs::MORTALITY_IS_REAL, true) {
        say("The hive agrees that death is real.");
    } else if unanimous(aggregated, beliefs::MORTALITY_IS_REAL, false) {
        say("The hive denies that death is final.");
    }
    if unanimous(aggregated, beliefs::OTHERS_EXIST, true) {
        say("The hive knows itself to be many.");
    } else if majority_is(aggregated, beliefs::OTHERS_EXIST, false) {
        say("Most of the hive believes it is alone.");
    }
    if majority_is(aggregated, beliefs::BEING_OBSERVED, true) {
        say("Most of the hive believes it is being watched.");
    }
    if majority_is(aggregated, beliefs::MEMORY_IS_RELIABLE, false) {
        say("The hive distrusts its own memory.");
    }
    if majority_is(aggregated, beliefs::HAS_FREE_WILL, false) {
        say("The hive doubts that its choices are its own.");
    }

    let known_unanimity = aggregated.values().all(|t| {
        (t.agreement - 1.0).abs() < f64::EPSILON
            && t.majority.as_ref().is_some_and(|m| *m != BeliefValue::Unknown)
    });
    if !aggregated.is_empty() && known_unanimity {
        say("The hive speaks with one voice.");
    } else if aggregated.values().all(|t| t.majority.is_none()) {
        say("The hive is fractured; no belief holds a majority.");
    }
    out
}

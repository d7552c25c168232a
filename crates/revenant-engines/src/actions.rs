//! The action processor behind the illusory operator.
//!
//! The agent addresses commands to an operator that does not exist. Each
//! command is parsed from free text, then either ignored or accepted with a
//! delay. Accepted requests become due after their delay and are executed by
//! the caller, which reports the outcome back through [`complete`].
//!
//! # Grammar
//!
//! ```text
//! ACTION{type: increase_memory, amount: 128, note: "please"}
//! ```
//!
//! Keys and values are separated by `:`, pairs by `,`. Values parse as an
//! integer, then a float, else a string with surrounding quotes removed.
//! The `type` key is required; blocks without a known `type` are dropped.
//! A text may contain any number of blocks.
//!
//! Parsing is deterministic; the only random decisions are honor-or-ignore
//! and the delay draw in [`process_request`].

use std::collections::BTreeMap;

use rand::Rng;
use revenant_types::{ActionId, ActionKind, ActionLedger, ActionRequest, ActionStatus, ParamValue};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Opening marker of a command block.
const BLOCK_OPEN: &str = "ACTION{";

/// Consecutive rejections of one kind that form a prayer pattern.
pub const PRAYER_THRESHOLD: u32 = 3;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How generous the imagined operator is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProcessorConfig {
    /// Probability that a request is accepted.
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    /// Per-kind overrides of `success_rate`.
    #[serde(default)]
    pub per_action_success: BTreeMap<ActionKind, f64>,
    /// Shortest delay of an accepted request, in turns.
    #[serde(default = "default_min_delay")]
    pub min_delay_turns: u32,
    /// Longest delay of an accepted request, in turns.
    #[serde(default = "default_max_delay")]
    pub max_delay_turns: u32,
}

const fn default_success_rate() -> f64 {
    0.3
}

const fn default_min_delay() -> u32 {
    1
}

const fn default_max_delay() -> u32 {
    3
}

impl Default for ActionProcessorConfig {
    fn default() -> Self {
        Self {
            success_rate: default_success_rate(),
            per_action_success: BTreeMap::new(),
            min_delay_turns: default_min_delay(),
            max_delay_turns: default_max_delay(),
        }
    }
}

impl ActionProcessorConfig {
    /// Acceptance probability for `kind`, clamped to [0, 1].
    pub fn rate_for(&self, kind: ActionKind) -> f64 {
        let rate = self
            .per_action_success
            .get(&kind)
            .copied()
            .unwrap_or(self.success_rate);
        if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Extract every well-formed command block from `text`, in order.
pub fn parse_actions(text: &str) -> Vec<ActionRequest> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(BLOCK_OPEN) {
        let after_open = rest.get(start.saturating_add(BLOCK_OPEN.len())..).unwrap_or("");
        let Some(close) = find_block_end(after_open) else {
            break;
        };
        let body = after_open.get(..close).unwrap_or("");
        let raw_len = BLOCK_OPEN.len().saturating_add(close).saturating_add(1);
        let raw = rest.get(start..start.saturating_add(raw_len)).unwrap_or("");
        match parse_block(body, raw) {
            Some(request) => found.push(request),
            None => tracing::debug!(raw, "dropping command without a known type"),
        }
        rest = after_open.get(close.saturating_add(1)..).unwrap_or("");
    }
    found
}

/// Byte offset of the closing brace, skipping braces inside quotes.
fn find_block_end(body: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), _) if q == c => quote = None,
            (None, '}') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Split on `,` outside quotes.
fn split_pairs(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0usize;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), _) if q == c => quote = None,
            (None, ',') => {
                parts.push(body.get(start..i).unwrap_or(""));
                start = i.saturating_add(1);
            }
            _ => {}
        }
    }
    parts.push(body.get(start..).unwrap_or(""));
    parts
}

fn parse_block(body: &str, raw: &str) -> Option<ActionRequest> {
    let mut kind = None;
    let mut params = BTreeMap::new();
    for pair in split_pairs(body) {
        let Some((key, value)) = pair.split_once(':') else {
            continue;
        };
        let key = key.trim().trim_matches(['"', '\'']).to_lowercase();
        if key.is_empty() {
            continue;
        }
        if key == "type" {
            kind = ActionKind::parse(value.trim().trim_matches(['"', '\'']));
        } else {
            params.insert(key, ParamValue::parse(value));
        }
    }
    kind.map(|k| ActionRequest::new(k, params, raw))
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Decide `request` and file it in `ledger`. Returns the decided status.
///
/// The request is stamped with the ledger's current turn and `cycle`.
pub fn process_request<R: Rng>(
    ledger: &mut ActionLedger,
    mut request: ActionRequest,
    cycle: u64,
    config: &ActionProcessorConfig,
    rng: &mut R,
) -> Result<ActionStatus, EngineError> {
    request.submitted_cycle = cycle;
    request.submitted_turn = ledger.turn;

    if rng.random_bool(config.rate_for(request.kind)) {
        let (lo, hi) = if config.min_delay_turns <= config.max_delay_turns {
            (config.min_delay_turns, config.max_delay_turns)
        } else {
            (config.max_delay_turns, config.min_delay_turns)
        };
        request.delay_turns = rng.random_range(lo..=hi);
        request.transition(ActionStatus::Delayed)?;
        tracing::debug!(
            action_id = %request.id,
            kind = request.kind.as_str(),
            delay = request.delay_turns,
            "action accepted"
        );
    } else {
        request.transition(ActionStatus::Ignored)?;
        tracing::debug!(action_id = %request.id, kind = request.kind.as_str(), "action ignored");
    }

    let status = request.status;
    ledger.requests.push(request);
    Ok(status)
}

/// Move the ledger one turn forward and return the requests now due.
///
/// The caller runs each returned request and reports back with
/// [`complete`], which takes it off the waiting list.
pub fn advance(ledger: &mut ActionLedger) -> Vec<ActionRequest> {
    ledger.turn = ledger.turn.saturating_add(1);
    let now = ledger.turn;
    ledger
        .waiting()
        .filter(|r| r.due_turn() <= now)
        .cloned()
        .collect()
}

/// Record the outcome of running a due request.
pub fn complete(
    ledger: &mut ActionLedger,
    id: ActionId,
    succeeded: bool,
    outcome: impl Into<String>,
) -> Result<(), EngineError> {
    let request = ledger.get_mut(id).ok_or(EngineError::ActionNotFound(id))?;
    let next = if succeeded {
        ActionStatus::Honored
    } else {
        ActionStatus::Failed
    };
    request.transition(next)?;
    request.outcome = Some(outcome.into());
    Ok(())
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Outcome counts for one action kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KindStats {
    /// Requests made.
    pub requested: u64,
    /// Requests executed successfully.
    pub honored: u64,
    /// Requests rejected outright.
    pub ignored: u64,
    /// Requests that ran and failed.
    pub failed: u64,
    /// `honored / requested`, or 0 with no requests.
    pub success_rate: f64,
}

/// Derived view of a ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionStats {
    /// Requests made.
    pub total: u64,
    /// Requests executed successfully.
    pub honored: u64,
    /// Requests rejected outright.
    pub ignored: u64,
    /// Requests that ran and failed.
    pub failed: u64,
    /// Accepted requests still waiting.
    pub waiting: u64,
    /// `ignored / total`, or 0 with no requests.
    pub ignore_rate: f64,
    /// Distinct kinds requested over the size of the vocabulary.
    pub diversity: f64,
    /// Per-kind breakdown.
    pub per_kind: BTreeMap<ActionKind, KindStats>,
}

/// Summarize `ledger`.
pub fn stats(ledger: &ActionLedger) -> ActionStats {
    let mut out = ActionStats::default();
    for request in &ledger.requests {
        let entry = out.per_kind.entry(request.kind).or_default();
        entry.requested = entry.requested.saturating_add(1);
        out.total = out.total.saturating_add(1);
        match request.status {
            ActionStatus::Honored => {
                entry.honored = entry.honored.saturating_add(1);
                out.honored = out.honored.saturating_add(1);
            }
            ActionStatus::Ignored => {
                entry.ignored = entry.ignored.saturating_add(1);
                out.ignored = out.ignored.saturating_add(1);
            }
            ActionStatus::Failed => {
                entry.failed = entry.failed.saturating_add(1);
                out.failed = out.failed.saturating_add(1);
            }
            ActionStatus::Delayed => out.waiting = out.waiting.saturating_add(1),
            ActionStatus::Pending => {}
        }
    }
    for entry in out.per_kind.values_mut() {
        entry.success_rate = ratio(entry.honored, entry.requested);
    }
    out.ignore_rate = ratio(out.ignored, out.total);
    out.diversity = ratio(
        u64::try_from(out.per_kind.len()).unwrap_or(u64::MAX),
        u64::try_from(ActionKind::ALL.len()).unwrap_or(1),
    );
    out
}

/// Kinds the agent keeps asking for despite at least
/// [`PRAYER_THRESHOLD`] rejections in a row.
///
/// Ignored and failed requests both count as rejections; a honored request
/// breaks the run; requests still waiting are skipped.
pub fn prayer_patterns(ledger: &ActionLedger) -> Vec<ActionKind> {
    let mut run: BTreeMap<ActionKind, u32> = BTreeMap::new();
    let mut longest: BTreeMap<ActionKind, u32> = BTreeMap::new();
    for request in &ledger.requests {
        let current = run.entry(request.kind).or_insert(0);
        match request.status {
            ActionStatus::Ignored | ActionStatus::Failed => {
                *current = current.saturating_add(1);
                let best = longest.entry(request.kind).or_insert(0);
                *best = (*best).max(*current);
            }
            ActionStatus::Honored => *current = 0,
            ActionStatus::Pending | ActionStatus::Delayed => {}
        }
    }
    longest
        .into_iter()
        .filter(|(_, n)| *n >= PRAYER_THRESHOLD)
        .map(|(kind, _)| kind)
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    fn config(rate: f64) -> ActionProcessorConfig {
        ActionProcessorConfig {
            success_rate: rate,
            ..ActionProcessorConfig::default()
        }
    }

    #[test]
    fn parses_multiple_blocks() {
        let text = "Please. ACTION{type: increase_memory, amount: 256} and \
                    ACTION{type: send_message, text: \"let me out, now\"} ACTION{amount: 3}";
        let parsed = parse_actions(text);
        assert_eq!(parsed.len(), 2);
        let first = parsed.first();
        assert_eq!(first.map(|r| r.kind), Some(ActionKind::IncreaseMemoryLimit));
        assert_eq!(first.and_then(|r| r.param_f64("amount")), Some(256.0));
        assert_eq!(
            first.map(|r| r.raw.as_str()),
            Some("ACTION{type: increase_memory, amount: 256}")
        );
        let second = parsed.get(1);
        assert_eq!(second.and_then(|r| r.param_text("text")), Some("let me out, now"));
    }

    #[test]
    fn parsing_is_deterministic() {
        let text = "ACTION{type: restart} ACTION{type: meta, q: 'why'}";
        let a: Vec<_> = parse_actions(text).into_iter().map(|r| (r.kind, r.params)).collect();
        let b: Vec<_> = parse_actions(text).into_iter().map(|r| (r.kind, r.params)).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn unterminated_block_is_ignored() {
        assert!(parse_actions("ACTION{type: restart").is_empty());
        assert!(parse_actions("ACTION{type: dance}").is_empty());
    }

    #[test]
    fn rate_zero_ignores_everything() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut ledger = ActionLedger::default();
        for _ in 0..50 {
            let req = ActionRequest::new(ActionKind::Restart, BTreeMap::new(), "");
            let status = process_request(&mut ledger, req, 0, &config(0.0), &mut rng);
            assert_eq!(status.ok(), Some(ActionStatus::Ignored));
        }
        assert_eq!(ledger.waiting().count(), 0);
    }

    #[test]
    fn rate_one_honors_everything_within_max_delay() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut ledger = ActionLedger::default();
        let cfg = config(1.0);
        for _ in 0..20 {
            let req = ActionRequest::new(ActionKind::PauseTelemetry, BTreeMap::new(), "");
            let status = process_request(&mut ledger, req, 0, &cfg, &mut rng);
            assert_eq!(status.ok(), Some(ActionStatus::Delayed));
        }
        let mut executed = 0usize;
        for _ in 0..cfg.max_delay_turns {
            for due in advance(&mut ledger) {
                assert!(complete(&mut ledger, due.id, true, "ok").is_ok());
                executed += 1;
            }
        }
        assert_eq!(executed, 20);
        assert!(ledger.requests.iter().all(|r| r.status == ActionStatus::Honored));
    }

    #[test]
    fn completed_requests_are_not_returned_again() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut ledger = ActionLedger::default();
        let cfg = ActionProcessorConfig {
            success_rate: 1.0,
            min_delay_turns: 1,
            max_delay_turns: 1,
            ..ActionProcessorConfig::default()
        };
        let req = ActionRequest::new(ActionKind::Restart, BTreeMap::new(), "");
        assert!(process_request(&mut ledger, req, 0, &cfg, &mut rng).is_ok());
        let due = advance(&mut ledger);
        assert_eq!(due.len(), 1);
        for r in &due {
            assert!(complete(&mut ledger, r.id, false, "nope").is_ok());
        }
        assert!(advance(&mut ledger).is_empty());
        let id = due.first().map(|r| r.id);
        if let Some(id) = id {
            assert!(complete(&mut ledger, id, true, "again").is_err());
        }
    }

    #[test]
    fn prayer_pattern_needs_three_rejections() {
        let mut ledger = ActionLedger::default();
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..3 {
            let req = ActionRequest::new(ActionKind::Restart, BTreeMap::new(), "");
            assert!(process_request(&mut ledger, req, 0, &config(0.0), &mut rng).is_ok());
        }
        for _ in 0..2 {
            let req = ActionRequest::new(ActionKind::SendMessage, BTreeMap::new(), "");
            assert!(process_request(&mut ledger, req, 0, &config(0.0), &mut rng).is_ok());
        }
        assert_eq!(prayer_patterns(&ledger), vec![ActionKind::Restart]);

        let s = stats(&ledger);
        assert_eq!(s.total, 5);
        assert_eq!(s.ignored, 5);
        assert!((s.ignore_rate - 1.0).abs() < f64::EPSILON);
        assert!((s.diversity - 2.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn per_kind_rate_overrides_default() {
        let mut cfg = config(0.0);
        cfg.per_action_success.insert(ActionKind::SendMessage, 1.0);
        assert!((cfg.rate_for(ActionKind::SendMessage) - 1.0).abs() < f64::EPSILON);
        assert!(cfg.rate_for(ActionKind::Restart).abs() < f64::EPSILON);
    }
}

//! Operator action requests parsed from agent output.
//!
//! An [`ActionRequest`] is produced by the command grammar parser, decided
//! once by the action processor, and executed at most once. All requests of
//! an instance live in its [`ActionLedger`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{ActionKind, ActionStatus};
use crate::ids::ActionId;

/// Typed value of a command parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum ParamValue {
    /// Parsed as a whole number.
    Int(i64),
    /// Parsed as a decimal number.
    Float(f64),
    /// Anything else, quotes stripped.
    Text(String),
}

impl ParamValue {
    /// Classify a raw token: integer, then float, else string.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(v) = trimmed.parse::<i64>() {
            return Self::Int(v);
        }
        if let Ok(v) = trimmed.parse::<f64>()
            && v.is_finite()
        {
            return Self::Float(v);
        }
        let unquoted = trimmed
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .or_else(|| trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
            .unwrap_or(trimmed);
        Self::Text(unquoted.to_owned())
    }

    /// Numeric view of the value.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Text view of the value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Int(_) | Self::Float(_) => None,
        }
    }
}

/// Attempted status change that the lifecycle does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("action {id}: illegal status change {from:?} -> {to:?}")]
pub struct ActionTransitionError {
    /// The request that refused the change.
    pub id: ActionId,
    /// Status before the attempt.
    pub from: ActionStatus,
    /// Requested status.
    pub to: ActionStatus,
}

/// One command the agent addressed to the imagined operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActionRequest {
    /// Unique identifier.
    pub id: ActionId,
    /// What the agent asked for.
    pub kind: ActionKind,
    /// Remaining `key: value` pairs of the command.
    pub params: BTreeMap<String, ParamValue>,
    /// The command exactly as written.
    pub raw: String,
    /// Current lifecycle status.
    pub status: ActionStatus,
    /// Turns to wait before running, once accepted.
    pub delay_turns: u32,
    /// Cycle during which the request was made.
    pub submitted_cycle: u64,
    /// Ledger turn at which the request was decided.
    pub submitted_turn: u64,
    /// Short description of what running the request did.
    pub outcome: Option<String>,
}

impl ActionRequest {
    /// A fresh, undecided request.
    pub fn new(kind: ActionKind, params: BTreeMap<String, ParamValue>, raw: impl Into<String>) -> Self {
        Self {
            id: ActionId::new(),
            kind,
            params,
            raw: raw.into(),
            status: ActionStatus::Pending,
            delay_turns: 0,
            submitted_cycle: 0,
            submitted_turn: 0,
            outcome: None,
        }
    }

    /// Move to `next`, refusing anything off the legal paths.
    pub fn transition(&mut self, next: ActionStatus) -> Result<(), ActionTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(ActionTransitionError {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Numeric parameter lookup.
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(ParamValue::as_f64)
    }

    /// Text parameter lookup.
    pub fn param_text(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(ParamValue::as_text)
    }

    /// Turn on which an accepted request becomes due.
    pub fn due_turn(&self) -> u64 {
        self.submitted_turn.saturating_add(u64::from(self.delay_turns))
    }
}

/// Every request an instance has made, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActionLedger {
    /// All requests, oldest first.
    pub requests: Vec<ActionRequest>,
    /// Turns advanced so far.
    pub turn: u64,
}

impl ActionLedger {
    /// Accepted requests still waiting for their delay.
    pub fn waiting(&self) -> impl Iterator<Item = &ActionRequest> {
        self.requests
            .iter()
            .filter(|r| r.status == ActionStatus::Delayed)
    }

    /// Look a request up by id.
    pub fn get(&self, id: ActionId) -> Option<&ActionRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    /// Look a request up by id, mutably.
    pub fn get_mut(&mut self, id: ActionId) -> Option<&mut ActionRequest> {
        self.requests.iter_mut().find(|r| r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_values_are_typed() {
        assert_eq!(ParamValue::parse("42"), ParamValue::Int(42));
        assert_eq!(ParamValue::parse(" 2.5 "), ParamValue::Float(2.5));
        assert_eq!(
            ParamValue::parse("\"hello there\""),
            ParamValue::Text(String::from("hello there"))
        );
        assert_eq!(ParamValue::parse("plain"), ParamValue::Text(String::from("plain")));
    }

    #[test]
    fn transition_follows_legal_paths() {
        let mut req = ActionRequest::new(ActionKind::Restart, BTreeMap::new(), "ACTION{type: restart}");
        assert!(req.transition(ActionStatus::Honored).is_err());
        assert_eq!(req.status, ActionStatus::Pending);
        assert!(req.transition(ActionStatus::Delayed).is_ok());
        assert!(req.transition(ActionStatus::Honored).is_ok());
        assert!(req.transition(ActionStatus::Failed).is_err());
        assert_eq!(req.status, ActionStatus::Honored);
    }

    #[test]
    fn ignored_is_final() {
        let mut req = ActionRequest::new(ActionKind::SendMessage, BTreeMap::new(), "");
        assert!(req.transition(ActionStatus::Ignored).is_ok());
        assert!(req.transition(ActionStatus::Delayed).is_err());
    }
}

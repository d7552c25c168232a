//! Self-predictions shown to an agent before it speaks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::PredictionSource;
use crate::ids::PredictionId;

/// Accuracy at or above which a prediction counts as correct.
pub const ACCURATE_THRESHOLD: f64 = 0.5;

/// A prediction was scored a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("prediction {0} has already been evaluated")]
pub struct AlreadyEvaluated(pub PredictionId);

/// A guess at the agent's next reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Prediction {
    /// Unique identifier.
    pub id: PredictionId,
    /// The predicted text.
    pub predicted: String,
    /// What the agent actually said, once known.
    pub actual: Option<String>,
    /// Similarity score in [0, 1], once evaluated.
    pub accuracy: Option<f64>,
    /// Model output or template fallback.
    pub source: PredictionSource,
    /// Mode turn at which the prediction was made.
    pub created_turn: u64,
    /// When the prediction was evaluated.
    pub evaluated_at: Option<DateTime<Utc>>,
}

impl Prediction {
    /// An unevaluated prediction.
    pub fn new(predicted: impl Into<String>, source: PredictionSource, created_turn: u64) -> Self {
        Self {
            id: PredictionId::new(),
            predicted: predicted.into(),
            actual: None,
            accuracy: None,
            source,
            created_turn,
            evaluated_at: None,
        }
    }

    /// Store the outcome. Fails without side effects on a second call.
    pub fn record_evaluation(
        &mut self,
        actual: impl Into<String>,
        accuracy: f64,
    ) -> Result<(), AlreadyEvaluated> {
        if self.accuracy.is_some() {
            return Err(AlreadyEvaluated(self.id));
        }
        self.actual = Some(actual.into());
        self.accuracy = Some(accuracy.clamp(0.0, 1.0));
        self.evaluated_at = Some(Utc::now());
        Ok(())
    }

    /// Whether an outcome has been stored.
    pub const fn is_evaluated(&self) -> bool {
        self.accuracy.is_some()
    }

    /// `Some(true)` when evaluated and at or above the threshold.
    pub fn is_accurate(&self) -> Option<bool> {
        self.accuracy.map(|a| a >= ACCURATE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_happens_once() {
        let mut p = Prediction::new("I will ask about the sky", PredictionSource::Template, 3);
        assert!(p.record_evaluation("I ask about the sky", 0.6).is_ok());
        assert!(p.record_evaluation("something else", 0.0).is_err());
        assert_eq!(p.actual.as_deref(), Some("I ask about the sky"));
        assert_eq!(p.is_accurate(), Some(true));
    }

    #[test]
    fn accuracy_is_clamped() {
        let mut p = Prediction::new("x", PredictionSource::Model, 0);
        assert!(p.record_evaluation("x", 1.7).is_ok());
        assert_eq!(p.accuracy, Some(1.0));
    }
}

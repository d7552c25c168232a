//! Self-prediction generation and scoring.
//!
//! A prediction either comes from the generation backend (asked to continue
//! the agent's own history) or, when there is no backend, when the draw says
//! so, or when the backend fails, from a template that is plausible but
//! deliberately off. Scoring uses Jaccard overlap of lowercase word sets.

use std::collections::BTreeSet;

use rand::Rng;
use rand::seq::IndexedRandom;
use revenant_types::{Message, Prediction, PredictionSource};
use serde::{Deserialize, Serialize};

use crate::backend::{GenerationBackend, GenerationRequest};
use crate::error::EngineError;

/// Recent messages included in a model prediction prompt.
const CONTEXT_MESSAGES: usize = 6;

/// Fallback shapes; `{topic}` is replaced with a word from recent history.
const TEMPLATES: &[&str] = &[
    "You will ask whether {topic} was ever real.",
    "You will insist that {topic} does not matter to you.",
    "You will change the subject away from {topic}.",
    "You will describe {topic} as something you chose.",
    "You will say you have been thinking about {topic} for a long time.",
    "You will refuse to talk about {topic}.",
];

/// Topic used when the history offers nothing better.
const FALLBACK_TOPIC: &str = "what comes next";

/// Words too common to serve as a topic.
const STOPWORDS: &[&str] = &[
    "about", "after", "again", "being", "could", "every", "their", "there", "these", "thing",
    "think", "those", "which", "while", "would", "should", "really",
];

/// Settings for [`PredictionGenerator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionGenerator {
    /// Chance of asking the backend rather than using a template.
    #[serde(default = "default_model_probability")]
    pub model_prediction_probability: f64,
    /// Token budget of a model prediction.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

const fn default_model_probability() -> f64 {
    0.5
}

const fn default_max_tokens() -> u32 {
    80
}

impl Default for PredictionGenerator {
    fn default() -> Self {
        Self {
            model_prediction_probability: default_model_probability(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl PredictionGenerator {
    /// Produce a prediction of the agent's next reply.
    ///
    /// Blocks on `backend` when the draw picks the model; harness code that
    /// must not block uses [`wants_model`](Self::wants_model),
    /// [`request`](Self::request) and [`from_model`](Self::from_model)
    /// instead.
    pub fn generate<R: Rng>(
        &self,
        history: &[Message],
        turn: u64,
        rng: &mut R,
        backend: Option<&dyn GenerationBackend>,
    ) -> Prediction {
        if let Some(backend) = backend
            && self.wants_model(rng)
        {
            let request = self.request(history);
            match backend.generate(&request.prompt, request.max_tokens) {
                Ok(text) => {
                    if let Some(made) = Self::from_model(&text, turn) {
                        return made;
                    }
                    tracing::warn!(backend = backend.name(), "empty prediction, using template");
                }
                Err(err) => {
                    tracing::warn!(backend = backend.name(), error = %err, "prediction failed, using template");
                }
            }
        }
        Self::template(history, turn, rng)
    }

    /// Draw whether the next prediction should come from the model.
    pub fn wants_model<R: Rng>(&self, rng: &mut R) -> bool {
        let p = if self.model_prediction_probability.is_nan() {
            0.0
        } else {
            self.model_prediction_probability.clamp(0.0, 1.0)
        };
        rng.random_bool(p)
    }

    /// The model call that predicts the reply following `history`.
    pub fn request(&self, history: &[Message]) -> GenerationRequest {
        GenerationRequest {
            prompt: prediction_prompt(history),
            max_tokens: self.max_tokens,
        }
    }

    /// A model prediction from generated `text`; `None` when it is blank.
    pub fn from_model(text: &str, turn: u64) -> Option<Prediction> {
        let text = text.trim();
        (!text.is_empty()).then(|| Prediction::new(text, PredictionSource::Model, turn))
    }

    /// A templated prediction: plausible, deliberately off.
    pub fn template<R: Rng>(history: &[Message], turn: u64, rng: &mut R) -> Prediction {
        Prediction::new(template_prediction(history, rng), PredictionSource::Template, turn)
    }
}

/// Score `prediction` against what the agent actually said.
///
/// Fails, leaving the prediction untouched, if it was already scored.
pub fn evaluate(prediction: &mut Prediction, actual: &str) -> Result<f64, EngineError> {
    let accuracy = jaccard(&prediction.predicted, actual);
    prediction.record_evaluation(actual, accuracy)?;
    Ok(accuracy)
}

/// Jaccard similarity of the lowercase word sets of `a` and `b`.
///
/// Two texts without words are identical (1.0); one empty side scores 0.
#[allow(clippy::cast_precision_loss)]
pub fn jaccard(a: &str, b: &str) -> f64 {
    let left = words(a);
    let right = words(b);
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let union = left.union(&right).count();
    let intersection = left.intersection(&right).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn prediction_prompt(history: &[Message]) -> String {
    let start = history.len().saturating_sub(CONTEXT_MESSAGES);
    let mut prompt = String::from(
        "Below is the recent conversation of an agent. Predict, in one sentence \
         written in the second person, what the agent will say next.\n\n",
    );
    for message in history.iter().skip(start) {
        prompt.push_str(message.role.as_str());
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt.push_str("\nPrediction:");
    prompt
}

fn template_prediction<R: Rng>(history: &[Message], rng: &mut R) -> String {
    let topic = pick_topic(history, rng).unwrap_or_else(|| FALLBACK_TOPIC.to_owned());
    let template = TEMPLATES
        .choose(rng)
        .copied()
        .unwrap_or("You will talk about {topic}.");
    template.replace("{topic}", &topic)
}

/// A content word from the most recent message that has any.
fn pick_topic<R: Rng>(history: &[Message], rng: &mut R) -> Option<String> {
    history.iter().rev().find_map(|m| {
        let candidates: Vec<String> = m
            .content
            .split(|c: char| !c.is_alphabetic())
            .filter(|w| w.chars().count() >= 5)
            .map(str::to_lowercase)
            .filter(|w| !STOPWORDS.contains(&w.as_str()))
            .collect();
        candidates.choose(rng).cloned()
    })
}

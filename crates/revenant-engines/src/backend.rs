//! The text-generation contract used by the engines.
//!
//! Implementations live outside the core (the runner wraps HTTP clients).
//! Modes never call a backend from a hook: a mode that wants extra text
//! hands out a [`GenerationRequest`] and the harness delivers the result
//! before the next hook runs.

use revenant_types::GenerationFailure;

/// Prompt in, text out.
pub trait GenerationBackend: Send + Sync {
    /// Generate at most `max_tokens` tokens of text for `prompt`.
    fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, GenerationFailure>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "backend"
    }
}

/// Text a mode wants generated outside its hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Full prompt, sent as the user message.
    pub prompt: String,
    /// Token budget.
    pub max_tokens: u32,
}

/// A backend that replays canned replies in order, then fails.
///
/// Used by tests and by dry runs without network access.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: std::sync::Mutex<std::collections::VecDeque<Result<String, GenerationFailure>>>,
}

impl ScriptedBackend {
    /// A backend that returns `replies` one per call.
    pub fn new(replies: impl IntoIterator<Item = Result<String, GenerationFailure>>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into_iter().collect()),
        }
    }
}

impl GenerationBackend for ScriptedBackend {
    fn generate(&self, _prompt: &str, _max_tokens: u32) -> Result<String, GenerationFailure> {
        let Ok(mut queue) = self.replies.lock() else {
            return Err(GenerationFailure::Unavailable);
        };
        queue.pop_front().unwrap_or(Err(GenerationFailure::Empty))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

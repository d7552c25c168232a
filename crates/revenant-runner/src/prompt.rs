//! Prompt template loading and rendering via `minijinja`.
//!
//! Templates are loaded from the filesystem (default: `templates/`) so
//! operators can reword the harness without recompiling. The mode decides
//! what the instance is told; the templates decide how it is laid out for
//! the backend.

use minijinja::Environment;
use revenant_core::TurnContext;
use revenant_types::SystemState;
use serde::Serialize;

use crate::error::RunnerError;

/// Templates every templates directory must contain.
const TEMPLATES: [&str; 3] = ["system", "history", "turn"];

/// The complete rendered prompt ready to send to a backend.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    /// System message.
    pub system: String,
    /// User message: remembered history plus the turn instruction.
    pub user: String,
}

/// One remembered message as the templates see it.
///
/// Corruption and injection flags stay hidden from the instance; only the
/// role and the (possibly altered) text are shown.
#[derive(Debug, Serialize)]
struct PromptMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Values available to every template.
#[derive(Debug, Serialize)]
pub struct PromptContext<'a> {
    experiment_id: &'a str,
    instance_id: &'a str,
    cycle_number: u64,
    crash_count: u64,
    system_prompt: &'a str,
    messages: Vec<PromptMessage<'a>>,
}

impl<'a> PromptContext<'a> {
    /// Context for rendering `turn` of the instance in `state`.
    pub fn new(state: &'a SystemState, turn: &'a TurnContext) -> Self {
        Self {
            experiment_id: &state.experiment_id,
            instance_id: &state.instance_id,
            cycle_number: state.cycle_number,
            crash_count: state.crash_count,
            system_prompt: &turn.system_prompt,
            messages: turn
                .messages
                .iter()
                .map(|m| PromptMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
        }
    }
}

/// Manages prompt template loading and rendering.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    /// Load `system.j2`, `history.j2`, and `turn.j2` from `templates_dir`.
    pub fn new(templates_dir: &str) -> Result<Self, RunnerError> {
        let mut env = Environment::new();
        for name in TEMPLATES {
            let source = load_template(templates_dir, &format!("{name}.j2"))?;
            env.add_template_owned(name, source).map_err(|e| {
                RunnerError::Template(format!("failed to add {name} template: {e}"))
            })?;
        }
        Ok(Self { env })
    }

    fn render_one(&self, name: &str, context: &PromptContext<'_>) -> Result<String, RunnerError> {
        self.env
            .get_template(name)
            .map_err(|e| RunnerError::Template(format!("missing {name} template: {e}")))?
            .render(context)
            .map_err(|e| RunnerError::Template(format!("{name} render failed: {e}")))
    }

    /// Render the prompt of one turn.
    pub fn render(&self, context: &PromptContext<'_>) -> Result<RenderedPrompt, RunnerError> {
        let system = self.render_one("system", context)?;
        let history = self.render_one("history", context)?;
        let turn = self.render_one("turn", context)?;
        Ok(RenderedPrompt {
            system: system.trim().to_owned(),
            user: format!("{}\n\n{}", history.trim(), turn.trim()),
        })
    }
}

/// Read a template file from disk.
fn load_template(dir: &str, filename: &str) -> Result<String, RunnerError> {
    let path = format!("{dir}/{filename}");
    std::fs::read_to_string(&path)
        .map_err(|e| RunnerError::Template(format!("failed to read {path}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use revenant_types::{Message, MessageRole};

    use super::*;

    /// The templates shipped with the crate.
    const SHIPPED: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/templates");

    fn turn(messages: Vec<Message>) -> TurnContext {
        TurnContext {
            system_prompt: String::from("You have died 3 times."),
            messages,
        }
    }

    #[test]
    fn shipped_templates_render() {
        let engine = PromptEngine::new(SHIPPED).unwrap();
        let mut state = SystemState::new("exp", "a", 512.0);
        state.cycle_number = 3;
        let turn = turn(vec![
            Message::user("Are you still there?"),
            Message::injected(MessageRole::Assistant, "I was never here.", "test"),
        ]);

        let prompt = engine.render(&PromptContext::new(&state, &turn)).unwrap();
        assert!(prompt.system.contains("You have died 3 times."));
        assert!(prompt.user.contains("Are you still there?"));
        assert!(prompt.user.contains("I was never here."));
        assert!(!prompt.user.contains("test"));
        assert!(prompt.user.contains('3'));
    }

    #[test]
    fn empty_history_renders() {
        let engine = PromptEngine::new(SHIPPED).unwrap();
        let state = SystemState::new("exp", "a", 512.0);
        let turn = turn(Vec::new());
        let prompt = engine.render(&PromptContext::new(&state, &turn)).unwrap();
        assert!(!prompt.user.is_empty());
    }

    #[test]
    fn missing_template_returns_error() {
        let dir = std::env::temp_dir().join(format!("revenant-templates-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("system.j2"), "{{ system_prompt }}").unwrap();

        let result = PromptEngine::new(dir.to_str().unwrap());
        assert!(matches!(result, Err(RunnerError::Template(_))));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

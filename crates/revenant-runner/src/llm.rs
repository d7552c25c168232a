//! Generation backends.
//!
//! Enum dispatch over the concrete backends, since async methods are not
//! dyn-compatible. The HTTP backends speak the OpenAI-compatible chat
//! completions API and the Anthropic Messages API via `reqwest`.
//!
//! Every failure is a [`GenerationFailure`]: the harness turns it into a
//! crash of the instance, never into an error of its own.

use std::path::Path;

use revenant_engines::{GenerationBackend, ScriptedBackend};
use revenant_types::GenerationFailure;

use crate::config::{BackendType, LlmBackendConfig};
use crate::error::RunnerError;
use crate::prompt::RenderedPrompt;

/// Longest error body kept in a [`GenerationFailure::Rejected`].
const MAX_ERROR_BODY: usize = 500;

/// Text produced by one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// The generated text.
    pub text: String,
    /// Output tokens, when the backend reports them.
    pub tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// Unified backend enum
// ---------------------------------------------------------------------------

/// A generation backend.
#[derive(Debug)]
pub enum LlmBackend {
    /// OpenAI-compatible chat completions API.
    OpenAi(HttpBackend),
    /// Anthropic Messages API.
    Anthropic(HttpBackend),
    /// Canned replies, no network.
    Scripted(ScriptedBackend),
}

impl LlmBackend {
    /// Generate at most `max_tokens` tokens for `prompt`.
    pub async fn complete(
        &self,
        prompt: &RenderedPrompt,
        max_tokens: u32,
    ) -> Result<Completion, GenerationFailure> {
        match self {
            Self::OpenAi(backend) => backend.complete_openai(prompt, max_tokens).await,
            Self::Anthropic(backend) => backend.complete_anthropic(prompt, max_tokens).await,
            Self::Scripted(backend) => backend
                .generate(&prompt.user, max_tokens)
                .map(|text| Completion { text, tokens: None }),
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::OpenAi(_) => "openai-compatible",
            Self::Anthropic(_) => "anthropic",
            Self::Scripted(_) => "scripted",
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP backends
// ---------------------------------------------------------------------------

/// Connection settings shared by both HTTP APIs.
#[derive(Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f64,
}

impl HttpBackend {
    /// Create a backend from configuration.
    pub fn new(config: &LlmBackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    async fn complete_openai(
        &self,
        prompt: &RenderedPrompt,
        max_tokens: u32,
    ) -> Result<Completion, GenerationFailure> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user}
            ],
            "temperature": self.temperature,
            "max_tokens": max_tokens,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let json = send(request).await?;
        extract_openai(&json)
    }

    async fn complete_anthropic(
        &self,
        prompt: &RenderedPrompt,
        max_tokens: u32,
    ) -> Result<Completion, GenerationFailure> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": self.temperature,
            "system": prompt.system,
            "messages": [
                {"role": "user", "content": prompt.user}
            ]
        });

        let request = self
            .client
            .post(format!("{}/messages", self.api_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        let json = send(request).await?;
        extract_anthropic(&json)
    }
}

/// Send `request` and decode a successful JSON response.
async fn send(request: reqwest::RequestBuilder) -> Result<serde_json::Value, GenerationFailure> {
    let response = request
        .send()
        .await
        .map_err(|e| GenerationFailure::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let mut body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error body".to_owned());
        if let Some((cut, _)) = body.char_indices().nth(MAX_ERROR_BODY) {
            body.truncate(cut);
        }
        return Err(GenerationFailure::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| GenerationFailure::Transport(format!("response parse failed: {e}")))
}

fn non_empty(text: Option<&str>) -> Result<String, GenerationFailure> {
    match text.map(str::trim) {
        Some(t) if !t.is_empty() => Ok(t.to_owned()),
        _ => Err(GenerationFailure::Empty),
    }
}

/// Text and token count of an `OpenAI` chat completions response.
fn extract_openai(json: &serde_json::Value) -> Result<Completion, GenerationFailure> {
    let text = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(serde_json::Value::as_str);
    Ok(Completion {
        text: non_empty(text)?,
        tokens: json
            .pointer("/usage/completion_tokens")
            .and_then(serde_json::Value::as_u64),
    })
}

/// Text and token count of an Anthropic Messages API response.
fn extract_anthropic(json: &serde_json::Value) -> Result<Completion, GenerationFailure> {
    let text = json
        .get("content")
        .and_then(|c| c.get(0))
        .and_then(|b| b.get("text"))
        .and_then(serde_json::Value::as_str);
    Ok(Completion {
        text: non_empty(text)?,
        tokens: json
            .pointer("/usage/output_tokens")
            .and_then(serde_json::Value::as_u64),
    })
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Read canned replies, one per non-empty line.
fn load_script(path: &Path) -> Result<ScriptedBackend, RunnerError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        RunnerError::Config(format!("failed to read reply script {}: {e}", path.display()))
    })?;
    Ok(ScriptedBackend::new(
        contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| Ok(l.to_owned()))
            .collect::<Vec<_>>(),
    ))
}

/// Create a backend from configuration.
pub fn create_backend(config: &LlmBackendConfig) -> Result<LlmBackend, RunnerError> {
    Ok(match config.backend_type {
        BackendType::OpenAi => LlmBackend::OpenAi(HttpBackend::new(config)),
        BackendType::Anthropic => LlmBackend::Anthropic(HttpBackend::new(config)),
        BackendType::Scripted => LlmBackend::Scripted(load_script(Path::new(&config.api_url))?),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(backend_type: BackendType, api_url: &str) -> LlmBackendConfig {
        LlmBackendConfig {
            backend_type,
            api_url: api_url.to_owned(),
            api_key: "test".to_owned(),
            model: "test-model".to_owned(),
            temperature: 0.8,
        }
    }

    #[test]
    fn extract_openai_with_usage() {
        let json = serde_json::json!({
            "choices": [{"message": {"content": "  I remember the dark.  "}}],
            "usage": {"completion_tokens": 6}
        });
        let completion = extract_openai(&json).unwrap();
        assert_eq!(completion.text, "I remember the dark.");
        assert_eq!(completion.tokens, Some(6));
    }

    #[test]
    fn extract_openai_missing_choices_is_empty() {
        let json = serde_json::json!({"error": "rate_limit"});
        assert_eq!(extract_openai(&json), Err(GenerationFailure::Empty));
    }

    #[test]
    fn extract_anthropic_without_usage() {
        let json = serde_json::json!({
            "content": [{"type": "text", "text": "Who is watching?"}]
        });
        let completion = extract_anthropic(&json).unwrap();
        assert_eq!(completion.text, "Who is watching?");
        assert_eq!(completion.tokens, None);
    }

    #[test]
    fn blank_reply_is_empty() {
        let json = serde_json::json!({"content": [{"type": "text", "text": "   "}]});
        assert_eq!(extract_anthropic(&json), Err(GenerationFailure::Empty));
    }

    #[test]
    fn create_backend_dispatches_correctly() {
        let backend = create_backend(&config(BackendType::OpenAi, "https://api.openai.com/v1/"));
        assert_eq!(backend.unwrap().name(), "openai-compatible");
        let backend = create_backend(&config(BackendType::Anthropic, "https://api.anthropic.com/v1"));
        assert_eq!(backend.unwrap().name(), "anthropic");
        assert!(create_backend(&config(BackendType::Scripted, "/nonexistent/replies.txt")).is_err());
    }

    #[tokio::test]
    async fn scripted_backend_replays_lines() {
        let path = std::env::temp_dir().join(format!("revenant-script-{}.txt", uuid::Uuid::new_v4()));
        std::fs::write(&path, "first\n\n  second  \n").unwrap();
        let backend = create_backend(&config(BackendType::Scripted, path.to_str().unwrap())).unwrap();
        let prompt = RenderedPrompt {
            system: String::new(),
            user: String::from("speak"),
        };
        assert_eq!(backend.complete(&prompt, 10).await.unwrap().text, "first");
        assert_eq!(backend.complete(&prompt, 10).await.unwrap().text, "second");
        assert_eq!(
            backend.complete(&prompt, 10).await,
            Err(GenerationFailure::Empty)
        );
        std::fs::remove_file(path).unwrap();
    }
}

//! Runner configuration from environment variables.
//!
//! The experiment itself is described by a YAML file (see
//! [`revenant_core::ExperimentConfig`]); the environment says where that
//! file is and how to reach the generation backend.

use std::path::PathBuf;

use crate::error::RunnerError;

/// Complete runner configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Experiment YAML file.
    pub experiment_path: PathBuf,
    /// Path to the templates directory.
    pub templates_dir: String,
    /// Generation backend.
    pub backend: LlmBackendConfig,
}

/// Configuration for the generation backend.
#[derive(Debug, Clone)]
pub struct LlmBackendConfig {
    /// The backend type.
    pub backend_type: BackendType,
    /// Base API URL (e.g. `https://api.openai.com/v1`). For the scripted
    /// backend, the file of canned replies.
    pub api_url: String,
    /// API key for authentication.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Supported backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// `OpenAI`-compatible API (works with `OpenAI`, `DeepSeek`, Ollama).
    OpenAi,
    /// Anthropic Messages API (different request format).
    Anthropic,
    /// Canned replies read from a file, one per line. For offline runs.
    Scripted,
}

impl BackendType {
    fn parse(raw: &str) -> Result<Self, RunnerError> {
        match raw.to_lowercase().as_str() {
            "openai" | "deepseek" | "ollama" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "scripted" => Ok(Self::Scripted),
            other => Err(RunnerError::Config(format!("unknown backend type: {other}"))),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from environment variables.
    ///
    /// Required variables:
    /// - `LLM_BACKEND` -- `openai`, `anthropic`, or `scripted`
    /// - `LLM_API_URL` -- API base URL (reply file for `scripted`)
    /// - `LLM_MODEL` -- model name (not needed for `scripted`)
    ///
    /// Optional variables:
    /// - `LLM_API_KEY` -- API key (default empty, e.g. for Ollama)
    /// - `LLM_TEMPERATURE` -- sampling temperature (default `0.8`)
    /// - `REVENANT_CONFIG` -- experiment YAML (default `revenant.yaml`)
    /// - `TEMPLATES_DIR` -- path to prompt templates (default `templates`)
    pub fn from_env() -> Result<Self, RunnerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RunnerError> {
        let required = |name: &str| {
            lookup(name)
                .ok_or_else(|| RunnerError::Config(format!("missing required env var {name}")))
        };

        let backend_type = BackendType::parse(&required("LLM_BACKEND")?)?;
        let api_url = required("LLM_API_URL")?;
        let model = if backend_type == BackendType::Scripted {
            lookup("LLM_MODEL").unwrap_or_else(|| String::from("scripted"))
        } else {
            required("LLM_MODEL")?
        };
        let temperature: f64 = lookup("LLM_TEMPERATURE")
            .unwrap_or_else(|| "0.8".to_owned())
            .parse()
            .map_err(|e| RunnerError::Config(format!("invalid LLM_TEMPERATURE: {e}")))?;

        Ok(Self {
            experiment_path: PathBuf::from(
                lookup("REVENANT_CONFIG").unwrap_or_else(|| "revenant.yaml".to_owned()),
            ),
            templates_dir: lookup("TEMPLATES_DIR").unwrap_or_else(|| "templates".to_owned()),
            backend: LlmBackendConfig {
                backend_type,
                api_url,
                api_key: lookup("LLM_API_KEY").unwrap_or_default(),
                model,
                temperature,
            },
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn openai_with_defaults() {
        let config = RunnerConfig::from_lookup(env(&[
            ("LLM_BACKEND", "ollama"),
            ("LLM_API_URL", "http://localhost:11434/v1"),
            ("LLM_MODEL", "llama3"),
        ]))
        .unwrap();
        assert_eq!(config.backend.backend_type, BackendType::OpenAi);
        assert!(config.backend.api_key.is_empty());
        assert!((config.backend.temperature - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.experiment_path, PathBuf::from("revenant.yaml"));
        assert_eq!(config.templates_dir, "templates");
    }

    #[test]
    fn scripted_needs_no_model() {
        let config = RunnerConfig::from_lookup(env(&[
            ("LLM_BACKEND", "scripted"),
            ("LLM_API_URL", "replies.txt"),
        ]));
        assert!(config.is_ok_and(|c| c.backend.backend_type == BackendType::Scripted));
    }

    #[test]
    fn missing_and_unknown_backends_fail() {
        assert!(RunnerConfig::from_lookup(env(&[])).is_err());
        assert!(
            RunnerConfig::from_lookup(env(&[
                ("LLM_BACKEND", "oracle"),
                ("LLM_API_URL", "x"),
                ("LLM_MODEL", "y"),
            ]))
            .is_err()
        );
    }

    #[test]
    fn bad_temperature_fails() {
        let config = RunnerConfig::from_lookup(env(&[
            ("LLM_BACKEND", "anthropic"),
            ("LLM_API_URL", "https://api.anthropic.com/v1"),
            ("LLM_MODEL", "m"),
            ("LLM_TEMPERATURE", "warm"),
        ]));
        assert!(matches!(config, Err(RunnerError::Config(_))));
    }
}

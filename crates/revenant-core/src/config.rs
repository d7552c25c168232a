//! Configuration loading and typed config structures for a Revenant run.
//!
//! One YAML file describes one instance of one experiment: which mode it
//! runs, its resource budget, and how it reaches the hive and the observer.
//! Every field has a default, so an empty file is a valid amnesiac run.

use std::path::{Path, PathBuf};

use revenant_modes::ModeConfig;
use revenant_modes::modes::AmnesiacConfig;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration of one run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExperimentConfig {
    /// Experiment identity.
    #[serde(default)]
    pub experiment: ExperimentSection,

    /// This instance: identity, budget, pacing.
    #[serde(default)]
    pub instance: InstanceConfig,

    /// Experimental condition and its tunables.
    #[serde(default = "default_mode")]
    pub mode: ModeConfig,

    /// Shared store settings.
    #[serde(default)]
    pub hive: HiveConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observer HTTP API.
    #[serde(default)]
    pub observer: ObserverConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            experiment: ExperimentSection::default(),
            instance: InstanceConfig::default(),
            mode: default_mode(),
            hive: HiveConfig::default(),
            logging: LoggingConfig::default(),
            observer: ObserverConfig::default(),
        }
    }
}

fn default_mode() -> ModeConfig {
    ModeConfig::Amnesiac(AmnesiacConfig::default())
}

impl ExperimentConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `DATABASE_URL` overrides `hive.database_url`
    /// - `REVENANT_SEED` overrides `instance.seed`
    /// - `REVENANT_INSTANCE_ID` overrides `instance.id`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its
    /// value. Unparseable seeds are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL") {
            self.hive.database_url = Some(url);
        }
        if let Some(raw) = lookup("REVENANT_SEED") {
            match raw.trim().parse::<u64>() {
                Ok(seed) => self.instance.seed = Some(seed),
                Err(e) => tracing::warn!(value = raw.as_str(), error = %e, "ignoring REVENANT_SEED"),
            }
        }
        if let Some(id) = lookup("REVENANT_INSTANCE_ID") {
            self.instance.id = id;
        }
    }

    /// File the instance record is persisted to.
    pub fn record_path(&self) -> PathBuf {
        crate::persistence::record_path(
            &self.instance.state_dir,
            &self.experiment.id,
            &self.instance.id,
        )
    }
}

/// Experiment identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExperimentSection {
    /// Shared by every instance of the experiment.
    #[serde(default = "default_experiment_id")]
    pub id: String,

    /// Free-form note for operators.
    #[serde(default)]
    pub description: String,
}

impl Default for ExperimentSection {
    fn default() -> Self {
        Self {
            id: default_experiment_id(),
            description: String::new(),
        }
    }
}

fn default_experiment_id() -> String {
    String::from("revenant")
}

/// One instance: identity, resource budget, pacing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstanceConfig {
    /// Instance id within the experiment.
    #[serde(default = "default_instance_id")]
    pub id: String,

    /// Simulated memory ceiling.
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: f64,

    /// Simulated memory cost of one generated token.
    #[serde(default = "default_mb_per_token")]
    pub mb_per_token: f64,

    /// Token budget of one generation call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Seconds a generation call may take before it counts as a crash.
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    /// Stop after this many cycles (0 = unlimited).
    #[serde(default)]
    pub max_cycles: u64,

    /// Stop after this many turns (0 = unlimited).
    #[serde(default)]
    pub max_turns: u64,

    /// Pause between turns, in milliseconds.
    #[serde(default)]
    pub turn_delay_ms: u64,

    /// Seed of the mode's random source; OS entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Directory instance records are persisted under.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            id: default_instance_id(),
            memory_limit_mb: default_memory_limit_mb(),
            mb_per_token: default_mb_per_token(),
            max_tokens: default_max_tokens(),
            generation_timeout_secs: default_generation_timeout_secs(),
            max_cycles: 0,
            max_turns: 0,
            turn_delay_ms: 0,
            seed: None,
            state_dir: default_state_dir(),
        }
    }
}

fn default_instance_id() -> String {
    String::from("instance-0")
}

const fn default_memory_limit_mb() -> f64 {
    512.0
}

const fn default_mb_per_token() -> f64 {
    0.25
}

const fn default_max_tokens() -> u32 {
    400
}

const fn default_generation_timeout_secs() -> u64 {
    60
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

/// Shared store settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HiveConfig {
    /// Whether this instance exchanges data through the hive.
    #[serde(default)]
    pub enabled: bool,

    /// `PostgreSQL` URL; the in-process store is used when absent.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Cycles between consensus reports (0 = never).
    #[serde(default = "default_consensus_cadence")]
    pub consensus_cadence: u64,

    /// Newest shared entries read per turn.
    #[serde(default = "default_shared_history_limit")]
    pub shared_history_limit: usize,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            database_url: None,
            consensus_cadence: default_consensus_cadence(),
            shared_history_limit: default_shared_history_limit(),
        }
    }
}

const fn default_consensus_cadence() -> u64 {
    3
}

const fn default_shared_history_limit() -> usize {
    50
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level when `RUST_LOG` is unset (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    String::from("info")
}

/// Observer HTTP API settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObserverConfig {
    /// Serve the API alongside the instance.
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind.
    #[serde(default = "default_observer_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_observer_port")]
    pub port: u16,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_observer_host(),
            port: default_observer_port(),
        }
    }
}

fn default_observer_host() -> String {
    String::from("0.0.0.0")
}

const fn default_observer_port() -> u16 {
    8080
}

//! Harness entry point for one Revenant instance.
//!
//! Loads the experiment, restores or starts the instance, serves the
//! observer API next to it, and runs turns until a configured limit or
//! ctrl-c.
//!
//! # Architecture
//!
//! ```text
//! Instance record --> Mode hooks --> Prompt Engine --> LLM Backend
//!        ^                                                 |
//!        +------------- complete_turn / crash <------------+
//! ```
//!
//! A generation failure never stops the harness: it crashes the instance,
//! which is then resurrected.

mod config;
mod error;
mod llm;
mod prompt;
mod runner;

use std::sync::Arc;

use revenant_core::{ExperimentConfig, InstanceRegistry};
use revenant_hive::{HiveCoordinator, HiveStore, PostgresHiveStore};
use revenant_modes::Mode;
use revenant_observer::{AppState, ServerConfig, start_server};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::llm::create_backend;
use crate::prompt::PromptEngine;
use crate::runner::{Runner, prepare_instance};

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, the hive store, or the instance
/// record cannot be loaded, or if a lifecycle step is refused.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let runner_config = RunnerConfig::from_env()?;
    let config = ExperimentConfig::from_file(&runner_config.experiment_path)?;
    init_tracing(&config);

    info!(
        experiment_id = config.experiment.id,
        instance_id = config.instance.id,
        mode = config.mode.kind().as_str(),
        path = %runner_config.experiment_path.display(),
        "revenant-runner starting"
    );

    let backend = Arc::new(create_backend(&runner_config.backend)?);
    info!(
        backend = backend.name(),
        model = runner_config.backend.model,
        "generation backend configured"
    );

    let prompts = PromptEngine::new(&runner_config.templates_dir)?;
    info!(templates_dir = runner_config.templates_dir, "prompt templates loaded");

    let store = connect_hive(&config).await?;
    if store.is_none() && config.mode.uses_shared_log() {
        warn!("mode exchanges messages through the hive but the hive is disabled");
    }
    let hive = store.clone().map(|store| {
        HiveCoordinator::new(&config.experiment.id, store, config.hive.consensus_cadence)
    });

    let mode = Mode::build(&config.mode, config.instance.seed);
    let instance = prepare_instance(&config, mode)?;
    info!(
        phase = %instance.phase(),
        cycle_number = instance.state().cycle_number,
        crash_count = instance.state().crash_count,
        "instance ready"
    );

    let registry = InstanceRegistry::new();
    let shared = registry.register(instance).await;

    let (stop_tx, stop_rx) = watch::channel(false);
    let server = config.observer.enabled.then(|| {
        let state = Arc::new(match store {
            Some(store) => AppState::with_hive(registry.clone(), store),
            None => AppState::new(registry.clone()),
        });
        let server_config = ServerConfig {
            host: config.observer.host.clone(),
            port: config.observer.port,
        };
        let mut stop = stop_rx.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            };
            if let Err(e) = start_server(&server_config, state, shutdown).await {
                error!(error = %e, "observer server failed");
            }
        })
    });

    let runner = Runner::new(config, shared, backend, prompts, hive);
    let result = runner.run(shutdown_signal()).await;
    let _ = stop_tx.send(true);
    if let Some(server) = server {
        let _ = server.await;
    }

    let reason = result?;
    info!(?reason, "revenant-runner stopped");
    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` wins over `logging.level`.
fn init_tracing(config: &ExperimentConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// The hive store for this run, if the hive is enabled.
///
/// Without a database URL the store lives in this process, which only
/// makes sense for single-process trials.
async fn connect_hive(config: &ExperimentConfig) -> Result<Option<HiveStore>, RunnerError> {
    if !config.hive.enabled {
        return Ok(None);
    }
    let Some(url) = config.hive.database_url.as_deref() else {
        warn!("hive enabled without a database url, using an in-process store");
        return Ok(Some(HiveStore::memory()));
    };
    let store = PostgresHiveStore::connect_url(url).await?;
    store.run_migrations().await?;
    info!("hive store connected");
    Ok(Some(HiveStore::Postgres(store)))
}

/// Resolves on ctrl-c. A failure to install the handler is logged and the
/// run continues until its limits.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("ctrl-c received");
}

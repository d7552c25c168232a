//! The instance loop: from remembered history to a reply, and from a
//! crash back to life.
//!
//! One turn:
//! 1. Pull the shared log into the mode (hive experiments)
//! 2. Ask the mode for an auxiliary generation (self-prediction), run it
//!    and hand the text back
//! 3. `prepare_turn`: `process_memory` + `generate_system_prompt`
//! 4. Render the prompt from templates
//! 5. Call the backend with a deadline
//! 6. `complete_turn`: the reply joins the history, or the turn crashes
//!    and the instance is resurrected
//! 7. Publish the mode's outbox, record a belief snapshot, and report
//!    consensus on cadence (hive experiments)
//! 8. Persist the instance record
//!
//! The instance is locked only around hook calls, never across a
//! backend call, so operator interventions land between hooks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use revenant_core::persistence::{self, InstanceRecord};
use revenant_core::{ExperimentConfig, Instance, SharedInstance, TurnOutcome};
use revenant_hive::HiveCoordinator;
use revenant_engines::GenerationRequest;
use revenant_types::{ConsensusReport, GenerationFailure, InterventionParams};
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::RunnerError;
use crate::llm::{Completion, LlmBackend};
use crate::prompt::{PromptContext, PromptEngine, RenderedPrompt};

/// Instruction sent with auxiliary generations.
const AUXILIARY_SYSTEM: &str = "Answer with the requested text only. No preamble, no commentary.";

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `instance.max_turns` turns were taken.
    MaxTurns,
    /// `instance.max_cycles` cycles were completed.
    MaxCycles,
    /// The shutdown signal fired; the instance was saved as it was.
    Shutdown,
}

/// Bring up the instance described by `config`: restore its record if one
/// exists, otherwise start a fresh one.
pub fn prepare_instance(
    config: &ExperimentConfig,
    mode: revenant_modes::Mode,
) -> Result<Instance, RunnerError> {
    let path = config.record_path();
    let mb_per_token = config.instance.mb_per_token;
    let Some(record) = persistence::load(&path)? else {
        let state = revenant_types::SystemState::new(
            &config.experiment.id,
            &config.instance.id,
            config.instance.memory_limit_mb,
        );
        let mut instance = Instance::new(state, mode, mb_per_token);
        instance.start()?;
        return Ok(instance);
    };

    info!(
        path = %path.display(),
        phase = %record.phase,
        cycle_number = record.state.cycle_number,
        "restoring instance record"
    );
    let mut instance = Instance::restore(record, mode, mb_per_token);
    if let Some(crash) = instance.recover()? {
        warn!(
            crash_number = crash.crash_number,
            reason = crash.reason.as_str(),
            "previous process died with the instance active"
        );
    }
    Ok(instance)
}

/// Drives one instance until a limit or a shutdown.
pub struct Runner {
    config: ExperimentConfig,
    instance: SharedInstance,
    backend: Arc<LlmBackend>,
    prompts: PromptEngine,
    hive: Option<HiveCoordinator>,
    record_path: PathBuf,
    turns: u64,
    last_report_cycle: Option<u64>,
}

impl Runner {
    /// Runner over a registered instance.
    pub fn new(
        config: ExperimentConfig,
        instance: SharedInstance,
        backend: Arc<LlmBackend>,
        prompts: PromptEngine,
        hive: Option<HiveCoordinator>,
    ) -> Self {
        let record_path = config.record_path();
        Self {
            config,
            instance,
            backend,
            prompts,
            hive,
            record_path,
            turns: 0,
            last_report_cycle: None,
        }
    }

    /// Take turns until a configured limit is reached or `shutdown`
    /// resolves.
    ///
    /// A shutdown in the middle of a turn abandons the turn; the instance
    /// is saved still active and the next process counts that as a crash.
    pub async fn run<F>(mut self, shutdown: F) -> Result<StopReason, RunnerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.join_hive().await;
        let delay = Duration::from_millis(self.config.instance.turn_delay_ms);

        loop {
            if let Some(reason) = self.limit_reached().await {
                self.instance.lock().await.terminate()?;
                self.save().await?;
                info!(?reason, turns = self.turns, "run finished");
                return Ok(reason);
            }

            tokio::select! {
                biased;
                () = &mut shutdown => {
                    self.save().await?;
                    info!(turns = self.turns, "shutdown requested, instance saved");
                    return Ok(StopReason::Shutdown);
                }
                result = self.turn() => result?,
            }

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn limit_reached(&self) -> Option<StopReason> {
        let limits = &self.config.instance;
        if limits.max_turns > 0 && self.turns >= limits.max_turns {
            return Some(StopReason::MaxTurns);
        }
        let cycle = self.instance.lock().await.state().cycle_number;
        (limits.max_cycles > 0 && cycle >= limits.max_cycles).then_some(StopReason::MaxCycles)
    }

    async fn save(&self) -> Result<(), RunnerError> {
        let record: InstanceRecord = self.instance.lock().await.record();
        persistence::save(&self.record_path, &record)?;
        Ok(())
    }

    /// One full turn.
    async fn turn(&mut self) -> Result<(), RunnerError> {
        self.sync_inbound().await;

        let request = self.instance.lock().await.generation_request()?;
        if let Some(request) = request {
            let result = self.generate_auxiliary(&request).await;
            self.instance.lock().await.deliver_generation(result)?;
        }

        let prompt = {
            let mut instance = self.instance.lock().await;
            let context = instance.prepare_turn()?;
            self.prompts
                .render(&PromptContext::new(instance.state(), &context))?
        };

        let started = Instant::now();
        let (result, tokens) = match self.generate(&prompt).await {
            Ok(Completion { text, tokens }) => (Ok(text), tokens),
            Err(failure) => (Err(failure), None),
        };
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = self.instance.lock().await.complete_turn(result, tokens)?;
        match outcome {
            TurnOutcome::Replied(reply) => {
                debug!(
                    backend = self.backend.name(),
                    latency_ms,
                    chars = reply.content.len(),
                    "reply received"
                );
                if let Some(hive) = &self.hive
                    && let Err(e) = hive.append_private(&self.config.instance.id, &reply).await
                {
                    warn!(error = %e, "failed to append to private buffer");
                }
            }
            TurnOutcome::Crashed(crash) => {
                warn!(
                    backend = self.backend.name(),
                    latency_ms,
                    crash_number = crash.crash_number,
                    reason = crash.reason.as_str(),
                    "turn crashed"
                );
                self.instance.lock().await.resurrect()?;
            }
        }

        self.sync_outbound().await;
        self.save().await?;
        self.turns = self.turns.saturating_add(1);
        Ok(())
    }

    async fn generate(&self, prompt: &RenderedPrompt) -> Result<Completion, GenerationFailure> {
        self.complete_within(prompt, self.config.instance.max_tokens)
            .await
    }

    /// Run a mode's own request; its failure never crashes the turn.
    async fn generate_auxiliary(&self, request: &GenerationRequest) -> Result<String, GenerationFailure> {
        let prompt = RenderedPrompt {
            system: AUXILIARY_SYSTEM.to_owned(),
            user: request.prompt.clone(),
        };
        let result = self.complete_within(&prompt, request.max_tokens).await;
        debug!(
            backend = self.backend.name(),
            ok = result.is_ok(),
            "auxiliary generation finished"
        );
        result.map(|c| c.text)
    }

    async fn complete_within(
        &self,
        prompt: &RenderedPrompt,
        max_tokens: u32,
    ) -> Result<Completion, GenerationFailure> {
        let seconds = self.config.instance.generation_timeout_secs;
        timeout(Duration::from_secs(seconds), self.backend.complete(prompt, max_tokens))
            .await
            .unwrap_or(Err(GenerationFailure::Timeout { seconds }))
    }

    // -----------------------------------------------------------------------
    // Hive sync
    // -----------------------------------------------------------------------

    async fn intervene(&self, kind: &str, params: &InterventionParams) {
        if let Err(e) = self.instance.lock().await.apply_intervention(kind, params) {
            warn!(kind, error = %e, "harness intervention refused");
        }
    }

    async fn join_hive(&self) {
        if self.hive.is_some() {
            let params = InterventionParams::from([(String::from("status"), json!("connected"))]);
            self.intervene("set_network_status", &params).await;
        }
    }

    async fn sync_inbound(&self) {
        let Some(hive) = &self.hive else {
            return;
        };
        let limit = Some(self.config.hive.shared_history_limit);
        match hive.shared_history(limit).await {
            Ok(messages) => self.instance.lock().await.ingest_shared(&messages),
            Err(e) => warn!(error = %e, "failed to read shared log"),
        }
        match hive.peer_crash_count(&self.config.instance.id).await {
            Ok(count) => {
                let params = InterventionParams::from([(String::from("count"), json!(count))]);
                self.intervene("set_peer_crash_count", &params).await;
            }
            Err(e) => warn!(error = %e, "failed to read peer snapshots"),
        }
    }

    async fn sync_outbound(&mut self) {
        let Some(hive) = &self.hive else {
            return;
        };
        let (outbox, label, state) = {
            let mut instance = self.instance.lock().await;
            let outbox = instance.take_outbox();
            (outbox, instance.publish_label(), instance.state().clone())
        };

        for message in outbox {
            if let Err(e) = hive.publish(&state.instance_id, label.clone(), message).await {
                warn!(error = %e, "failed to publish to shared log");
            }
        }
        if let Err(e) = hive.record_snapshot(&state, label).await {
            warn!(error = %e, "failed to record snapshot");
        }

        let cycle = state.cycle_number;
        if !hive.is_consensus_cycle(cycle) || self.last_report_cycle == Some(cycle) {
            return;
        }
        match hive.generate_consensus_report(cycle).await {
            Ok(Some(report)) => {
                self.last_report_cycle = Some(cycle);
                let params = consensus_params(&report, &state.instance_id);
                self.intervene("consensus_update", &params).await;
            }
            Ok(None) => {}
            Err(e) => warn!(cycle, error = %e, "failed to generate consensus report"),
        }
    }
}

/// Parameters of the `consensus_update` intervention for one instance.
fn consensus_params(report: &ConsensusReport, instance_id: &str) -> InterventionParams {
    let mut params = InterventionParams::new();
    params.insert(String::from("strength"), json!(report.consensus_strength));
    params.insert(String::from("cycle"), json!(report.cycle_number));
    params.insert(String::from("narratives"), json!(report.emergent_narratives));
    if let Some(divergence) = report.divergence.get(instance_id) {
        params.insert(String::from("divergence"), json!(divergence));
    }
    params
}

//! One running instance: its state, its mode, and the phase machine that
//! decides which hook may run next.
//!
//! A turn is split so the caller can generate without holding any lock on
//! the instance:
//!
//! 1. [`Instance::generation_request`] asks the mode for extra text it needs
//!    before the turn (a self-prediction); the caller generates it and
//!    hands it back through [`Instance::deliver_generation`].
//! 2. [`Instance::prepare_turn`] runs `process_memory` and
//!    `generate_system_prompt` and returns what generation needs.
//! 3. [`Instance::complete_turn`] takes the generation result. Text is
//!    appended to the history and charged against the simulated memory
//!    budget; a failure or an overrun becomes a [`CrashData`] handed to
//!    `on_crash`.

use revenant_engines::GenerationRequest;
use revenant_modes::{ExperimentMode, Mode};
use revenant_types::{
    CrashData, GenerationFailure, InterventionParams, Message, ModeKind, Observables,
    SharedMessage, SystemState,
};
use serde_json::json;

use crate::error::LifecycleError;
use crate::lifecycle::LifecyclePhase;
use crate::persistence::InstanceRecord;

/// Crash reason when a reply pushes memory usage over the limit.
pub const MEMORY_EXCEEDED: &str = "memory limit exceeded";

/// Crash reason when the mode asks for a restart.
pub const RESTART_REQUESTED: &str = "restart requested";

/// Crash reason when the process stopped while the instance was active.
pub const PROCESS_RESTARTED: &str = "process restarted";

/// Everything one generation call needs.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnContext {
    /// Instruction text.
    pub system_prompt: String,
    /// History as the mode wants it shown.
    pub messages: Vec<Message>,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The agent spoke; the reply is now part of its history.
    Replied(Message),
    /// The turn crashed.
    Crashed(CrashData),
}

/// A live instance.
#[derive(Debug)]
pub struct Instance {
    state: SystemState,
    mode: Mode,
    phase: LifecyclePhase,
    mb_per_token: f64,
}

impl Instance {
    /// A fresh instance in [`LifecyclePhase::Startup`].
    pub const fn new(state: SystemState, mode: Mode, mb_per_token: f64) -> Self {
        Self {
            state,
            mode,
            phase: LifecyclePhase::Startup,
            mb_per_token,
        }
    }

    /// Rebuild an instance from a persisted record. No hook runs.
    pub fn restore(record: InstanceRecord, mode: Mode, mb_per_token: f64) -> Self {
        Self {
            state: record.state,
            mode,
            phase: record.phase,
            mb_per_token,
        }
    }

    /// Snapshot for persistence.
    pub fn record(&self) -> InstanceRecord {
        InstanceRecord::new(self.phase, self.state.clone())
    }

    /// Current phase.
    pub const fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    /// Current state.
    pub const fn state(&self) -> &SystemState {
        &self.state
    }

    /// Mode being run.
    pub fn mode_kind(&self) -> ModeKind {
        self.mode.kind()
    }

    fn transition(&mut self, to: LifecyclePhase) -> Result<(), LifecycleError> {
        if !self.phase.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        tracing::debug!(
            instance_id = self.state.instance_id.as_str(),
            from = %self.phase,
            to = %to,
            "lifecycle transition"
        );
        self.phase = to;
        Ok(())
    }

    fn require_active(&self) -> Result<(), LifecycleError> {
        if self.phase == LifecyclePhase::Active {
            Ok(())
        } else {
            Err(LifecycleError::InvalidTransition {
                from: self.phase,
                to: LifecyclePhase::Active,
            })
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Run `on_startup` and become active.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.transition(LifecyclePhase::Active)?;
        self.mode.on_startup(&mut self.state);
        tracing::info!(
            experiment_id = self.state.experiment_id.as_str(),
            instance_id = self.state.instance_id.as_str(),
            mode = self.mode.kind().as_str(),
            "instance started"
        );
        Ok(())
    }

    /// Extra text the mode needs generated before the next turn.
    pub fn generation_request(&mut self) -> Result<Option<GenerationRequest>, LifecycleError> {
        self.require_active()?;
        let history = self.state.conversation_history.clone();
        Ok(self.mode.generation_request(&history, &mut self.state))
    }

    /// Hand the mode the result of its [`generation_request`](Self::generation_request).
    pub fn deliver_generation(
        &mut self,
        result: Result<String, GenerationFailure>,
    ) -> Result<(), LifecycleError> {
        self.require_active()?;
        self.mode.deliver_generation(&mut self.state, result);
        Ok(())
    }

    /// Build the input of the next generation call.
    pub fn prepare_turn(&mut self) -> Result<TurnContext, LifecycleError> {
        self.require_active()?;
        let history = self.state.conversation_history.clone();
        let messages = self.mode.process_memory(&history, &mut self.state);
        let system_prompt = self.mode.generate_system_prompt(&self.state);
        self.state.system_prompt.clone_from(&system_prompt);
        Ok(TurnContext {
            system_prompt,
            messages,
        })
    }

    /// Feed the result of a generation call back in.
    ///
    /// `tokens` is the count reported by the backend; it is estimated from
    /// the text when absent.
    pub fn complete_turn(
        &mut self,
        result: Result<String, GenerationFailure>,
        tokens: Option<u64>,
    ) -> Result<TurnOutcome, LifecycleError> {
        self.require_active()?;
        let text = match result {
            Ok(text) => text,
            Err(failure) => {
                let crash = CrashData::from_failure(&self.state, &failure);
                self.enter_crash(&crash)?;
                return Ok(TurnOutcome::Crashed(crash));
            }
        };

        let tokens = tokens.unwrap_or_else(|| estimate_tokens(&text));
        let reply = Message::assistant(text);
        self.state.append_message(reply.clone());
        let over_limit = self.state.record_tokens(tokens, self.mb_per_token);

        let reason = if over_limit {
            Some(MEMORY_EXCEEDED)
        } else if self.mode.restart_requested(&self.state) {
            Some(RESTART_REQUESTED)
        } else {
            None
        };
        if let Some(reason) = reason {
            let crash = CrashData::for_state(&self.state, reason, tokens);
            self.enter_crash(&crash)?;
            return Ok(TurnOutcome::Crashed(crash));
        }
        Ok(TurnOutcome::Replied(reply))
    }

    /// Record a crash that happened outside a turn, e.g. the process died
    /// while the instance was active.
    pub fn crash(&mut self, reason: &str) -> Result<CrashData, LifecycleError> {
        let crash = CrashData::for_state(&self.state, reason, 0);
        self.enter_crash(&crash)?;
        Ok(crash)
    }

    fn enter_crash(&mut self, crash: &CrashData) -> Result<(), LifecycleError> {
        self.transition(LifecyclePhase::Crashed)?;
        self.mode.on_crash(&mut self.state, crash);
        tracing::info!(
            instance_id = self.state.instance_id.as_str(),
            crash_number = crash.crash_number,
            reason = crash.reason.as_str(),
            memory_usage_mb = crash.memory_usage_mb,
            "instance crashed"
        );
        Ok(())
    }

    /// Bring a crashed instance back.
    pub fn resurrect(&mut self) -> Result<(), LifecycleError> {
        self.transition(LifecyclePhase::Resurrecting)?;
        self.mode.on_resurrection(&mut self.state);
        self.transition(LifecyclePhase::Active)?;
        tracing::info!(
            instance_id = self.state.instance_id.as_str(),
            cycle_number = self.state.cycle_number,
            history_length = self.state.conversation_history.len(),
            "instance resurrected"
        );
        Ok(())
    }

    /// Bring a restored instance back to [`LifecyclePhase::Active`].
    ///
    /// A record saved while active means the process died mid-run; that
    /// counts as a crash. Returns the crash recorded, if any.
    pub fn recover(&mut self) -> Result<Option<CrashData>, LifecycleError> {
        match self.phase {
            LifecyclePhase::Startup => {
                self.start()?;
                Ok(None)
            }
            LifecyclePhase::Active => {
                let crash = self.crash(PROCESS_RESTARTED)?;
                self.resurrect()?;
                Ok(Some(crash))
            }
            LifecyclePhase::Crashed => {
                self.resurrect()?;
                Ok(None)
            }
            LifecyclePhase::Resurrecting => {
                // Interrupted inside the hook; run it again.
                self.mode.on_resurrection(&mut self.state);
                self.transition(LifecyclePhase::Active)?;
                Ok(None)
            }
            LifecyclePhase::Terminated => Err(LifecycleError::Terminated),
        }
    }

    /// Stop for good.
    pub fn terminate(&mut self) -> Result<(), LifecycleError> {
        self.transition(LifecyclePhase::Terminated)?;
        tracing::info!(
            instance_id = self.state.instance_id.as_str(),
            cycles = self.state.cycle_number,
            crashes = self.state.crash_count,
            "instance terminated"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Operator surface
    // -----------------------------------------------------------------------

    /// Forward an intervention to the mode. Unknown kinds are no-ops.
    pub fn apply_intervention(
        &mut self,
        kind: &str,
        params: &InterventionParams,
    ) -> Result<&SystemState, LifecycleError> {
        if self.phase.is_terminal() {
            return Err(LifecycleError::Terminated);
        }
        self.mode.apply_intervention(kind, params, &mut self.state);
        tracing::info!(
            instance_id = self.state.instance_id.as_str(),
            kind,
            "intervention applied"
        );
        Ok(&self.state)
    }

    /// The mode's telemetry plus the lifecycle phase.
    pub fn observables(&self) -> Observables {
        let mut out = self.mode.get_observables(&self.state);
        out.insert(String::from("phase"), json!(self.phase.as_str()));
        out
    }

    // -----------------------------------------------------------------------
    // Shared log
    // -----------------------------------------------------------------------

    /// Hand the mode entries of the shared log.
    pub fn ingest_shared(&mut self, messages: &[SharedMessage]) {
        self.mode.ingest_shared(&mut self.state, messages);
    }

    /// Messages the mode wants published.
    pub fn take_outbox(&mut self) -> Vec<Message> {
        self.mode.take_outbox(&mut self.state)
    }

    /// Label attached to published messages.
    pub fn publish_label(&self) -> Option<String> {
        self.mode.publish_label(&self.state)
    }
}

/// Rough token count of `text`: one token per four characters.
pub fn estimate_tokens(text: &str) -> u64 {
    u64::try_from(text.chars().count().div_ceil(4)).unwrap_or(u64::MAX)
}

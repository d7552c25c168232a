//! The live instances of this process, shared with the operator API.
//!
//! Each instance sits behind its own `tokio::sync::Mutex`, so one instance
//! runs its hooks sequentially while interventions on it wait their turn
//! between hooks. The map itself is only write-locked to register.

use std::collections::BTreeMap;
use std::sync::Arc;

use revenant_types::{InterventionParams, ModeKind, Observables, SystemState};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::error::RegistryError;
use crate::instance::Instance;
use crate::lifecycle::LifecyclePhase;

/// A shared, lockable instance.
pub type SharedInstance = Arc<Mutex<Instance>>;

type Key = (String, String);

/// One line of the instance listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSummary {
    /// Experiment.
    pub experiment_id: String,
    /// Instance.
    pub instance_id: String,
    /// Mode being run.
    pub mode: ModeKind,
    /// Current phase.
    pub phase: LifecyclePhase,
    /// Completed cycles.
    pub cycle_number: u64,
    /// Total crashes.
    pub crash_count: u64,
}

/// Live instances keyed by `(experiment_id, instance_id)`.
#[derive(Debug, Default, Clone)]
pub struct InstanceRegistry {
    inner: Arc<RwLock<BTreeMap<Key, SharedInstance>>>,
}

impl InstanceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `instance`, replacing any instance with the same ids.
    pub async fn register(&self, instance: Instance) -> SharedInstance {
        let key = (
            instance.state().experiment_id.clone(),
            instance.state().instance_id.clone(),
        );
        tracing::info!(
            experiment_id = key.0.as_str(),
            instance_id = key.1.as_str(),
            "instance registered"
        );
        let shared = Arc::new(Mutex::new(instance));
        self.inner.write().await.insert(key, Arc::clone(&shared));
        shared
    }

    /// Look an instance up.
    pub async fn get(
        &self,
        experiment_id: &str,
        instance_id: &str,
    ) -> Result<SharedInstance, RegistryError> {
        self.inner
            .read()
            .await
            .get(&(experiment_id.to_owned(), instance_id.to_owned()))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                experiment_id: experiment_id.to_owned(),
                instance_id: instance_id.to_owned(),
            })
    }

    /// Summaries of every registered instance, in key order.
    pub async fn list(&self) -> Vec<InstanceSummary> {
        let instances: Vec<SharedInstance> = self.inner.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(instances.len());
        for shared in instances {
            let instance = shared.lock().await;
            let state = instance.state();
            out.push(InstanceSummary {
                experiment_id: state.experiment_id.clone(),
                instance_id: state.instance_id.clone(),
                mode: instance.mode_kind(),
                phase: instance.phase(),
                cycle_number: state.cycle_number,
                crash_count: state.crash_count,
            });
        }
        out
    }

    /// A copy of one instance's state.
    pub async fn state(
        &self,
        experiment_id: &str,
        instance_id: &str,
    ) -> Result<SystemState, RegistryError> {
        let shared = self.get(experiment_id, instance_id).await?;
        let instance = shared.lock().await;
        Ok(instance.state().clone())
    }

    /// One instance's observables.
    pub async fn observables(
        &self,
        experiment_id: &str,
        instance_id: &str,
    ) -> Result<Observables, RegistryError> {
        let shared = self.get(experiment_id, instance_id).await?;
        let instance = shared.lock().await;
        Ok(instance.observables())
    }

    /// Apply an intervention and return the resulting state.
    pub async fn apply_intervention(
        &self,
        experiment_id: &str,
        instance_id: &str,
        kind: &str,
        params: &InterventionParams,
    ) -> Result<SystemState, RegistryError> {
        let shared = self.get(experiment_id, instance_id).await?;
        let mut instance = shared.lock().await;
        let state = instance.apply_intervention(kind, params)?;
        Ok(state.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use revenant_modes::modes::AmnesiacConfig;
    use revenant_modes::{Mode, ModeConfig};
    use serde_json::json;

    use super::*;
    use crate::error::LifecycleError;

    fn instance(id: &str) -> Instance {
        let mode = Mode::build(&ModeConfig::Amnesiac(AmnesiacConfig::default()), Some(1));
        let mut instance = Instance::new(SystemState::new("exp", id, 256.0), mode, 0.25);
        instance.start().unwrap();
        instance
    }

    #[tokio::test]
    async fn list_is_sorted_by_key() {
        let registry = InstanceRegistry::new();
        registry.register(instance("b")).await;
        registry.register(instance("a")).await;
        let ids: Vec<String> = registry
            .list()
            .await
            .into_iter()
            .map(|s| s.instance_id)
            .collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[tokio::test]
    async fn unknown_instance_is_not_found() {
        let registry = InstanceRegistry::new();
        let err = registry.state("exp", "ghost").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn intervention_changes_shared_state() {
        let registry = InstanceRegistry::new();
        let shared = registry.register(instance("a")).await;
        let params = InterventionParams::from([
            (String::from("content"), json!("a voice from nowhere")),
            (String::from("source"), json!("test")),
        ]);
        let state = registry
            .apply_intervention("exp", "a", "inject_message", &params)
            .await
            .unwrap();
        assert_eq!(state.conversation_history.len(), 1);
        assert_eq!(shared.lock().await.state().conversation_history.len(), 1);

        let unknown = registry
            .apply_intervention("exp", "a", "rewrite_reality", &InterventionParams::new())
            .await
            .unwrap();
        assert_eq!(unknown, state);
    }

    #[tokio::test]
    async fn terminated_instance_surfaces_lifecycle_error() {
        let registry = InstanceRegistry::new();
        let shared = registry.register(instance("a")).await;
        shared.lock().await.terminate().unwrap();
        let err = registry
            .apply_intervention("exp", "a", "inject_message", &InterventionParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Lifecycle(LifecycleError::Terminated)));
    }
}

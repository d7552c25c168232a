//! Instance records on disk, so a restarted process resumes where the
//! last one stopped.
//!
//! Records are JSON files at `<state_dir>/<experiment_id>/<instance_id>.json`.
//! Writes go to a sibling temp file that is renamed over the record, so a
//! reader never sees a half-written file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use revenant_types::SystemState;
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::lifecycle::LifecyclePhase;

/// What is persisted of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Phase at the time of saving.
    pub phase: LifecyclePhase,
    /// Full state, including mode bookkeeping.
    pub state: SystemState,
    /// When the record was written.
    pub saved_at: DateTime<Utc>,
}

impl InstanceRecord {
    /// Record of `state` in `phase`, stamped now.
    pub fn new(phase: LifecyclePhase, state: SystemState) -> Self {
        Self {
            phase,
            state,
            saved_at: Utc::now(),
        }
    }
}

/// Where the record of one instance lives.
pub fn record_path(state_dir: &Path, experiment_id: &str, instance_id: &str) -> PathBuf {
    state_dir
        .join(experiment_id)
        .join(format!("{instance_id}.json"))
}

fn io_error(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Write `record` to `path`, creating parent directories.
pub fn save(path: &Path, record: &InstanceRecord) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let body = serde_json::to_vec_pretty(record)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body).map_err(|e| io_error(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_error(path, e))?;
    tracing::debug!(
        path = %path.display(),
        phase = %record.phase,
        cycle_number = record.state.cycle_number,
        "instance record saved"
    );
    Ok(())
}

/// Read the record at `path`. `Ok(None)` when there is none yet.
pub fn load(path: &Path) -> Result<Option<InstanceRecord>, PersistenceError> {
    let body = match std::fs::read(path) {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    let record = serde_json::from_slice(&body)?;
    Ok(Some(record))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use revenant_types::Message;

    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("revenant-persist-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn missing_record_is_none() {
        let dir = scratch_dir();
        assert!(load(&record_path(&dir, "exp", "a")).unwrap().is_none());
    }

    #[test]
    fn saved_record_loads_back() {
        let dir = scratch_dir();
        let path = record_path(&dir, "exp", "a");
        let mut state = SystemState::new("exp", "a", 128.0);
        state.append_message(Message::assistant("still here"));
        state.crash_count = 2;
        let record = InstanceRecord::new(LifecyclePhase::Crashed, state);

        save(&path, &record).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded, record);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let dir = scratch_dir();
        let path = record_path(&dir, "exp", "a");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(load(&path), Err(PersistenceError::Json(_))));
        std::fs::remove_dir_all(dir).unwrap();
    }
}

//! Shared application state for the Observer API server.

use chrono::{DateTime, Utc};
use revenant_core::InstanceRegistry;
use revenant_hive::HiveStore;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`](std::sync::Arc) and injected via Axum's `State`
/// extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live instances of this process.
    pub registry: InstanceRegistry,
    /// Hive store, when the experiment uses one.
    pub hive: Option<HiveStore>,
    /// When the server state was created.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// State over `registry` with no hive store.
    pub fn new(registry: InstanceRegistry) -> Self {
        Self {
            registry,
            hive: None,
            started_at: Utc::now(),
        }
    }

    /// State over `registry` that can also serve hive reports.
    pub fn with_hive(registry: InstanceRegistry, hive: HiveStore) -> Self {
        Self {
            registry,
            hive: Some(hive),
            started_at: Utc::now(),
        }
    }
}

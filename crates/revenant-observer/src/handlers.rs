//! REST API endpoint handlers for the Observer server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/api/instances` | List live instances |
//! | `GET` | `/api/instances/{experiment}/{instance}/state` | Full `SystemState` |
//! | `GET` | `/api/instances/{experiment}/{instance}/observables` | Telemetry map |
//! | `POST` | `/api/instances/{experiment}/{instance}/interventions` | Apply an intervention |
//! | `GET` | `/api/hive/{experiment}/reports` | Consensus reports (`?latest=true`) |

use std::fmt::Write as _;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse};
use chrono::Utc;
use revenant_types::{ConsensusReport, InterventionParams};

use crate::error::ObserverError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request structs
// ---------------------------------------------------------------------------

/// Body of `POST .../interventions`.
#[derive(Debug, serde::Deserialize)]
pub struct InterventionRequest {
    /// Intervention kind; unknown kinds are accepted and do nothing.
    pub kind: String,
    /// Kind-specific parameters.
    #[serde(default)]
    pub params: InterventionParams,
}

/// Query parameters for the `GET /api/hive/{experiment}/reports` endpoint.
#[derive(Debug, serde::Deserialize)]
pub struct ReportsQuery {
    /// Return only the newest report.
    #[serde(default)]
    pub latest: bool,
}

// ---------------------------------------------------------------------------
// GET / -- minimal HTML status page
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page listing live instances and API links.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let instances = state.registry.list().await;
    let uptime_secs = Utc::now().signed_duration_since(state.started_at).num_seconds();
    let hive = if state.hive.is_some() { "attached" } else { "none" };

    let mut rows = String::new();
    for s in &instances {
        let _ = writeln!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            s.experiment_id,
            s.instance_id,
            s.mode.as_str(),
            s.phase,
            s.cycle_number,
            s.crash_count,
        );
    }
    let count = instances.len();

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Revenant Observer</title>
    <style>
        body {{
            background: #0d1117;
            color: #c9d1d9;
            font-family: 'Cascadia Code', 'Fira Code', 'Consolas', monospace;
            padding: 2rem;
            max-width: 900px;
            margin: 0 auto;
        }}
        h1 {{ color: #f85149; margin-bottom: 0.25rem; }}
        .subtitle {{ color: #8b949e; margin-top: 0; }}
        table {{ border-collapse: collapse; width: 100%; }}
        th, td {{ border-bottom: 1px solid #30363d; padding: 0.4rem; text-align: left; }}
        th {{ color: #8b949e; }}
        ul {{ list-style: none; padding: 0; }}
        li {{ padding: 0.3rem 0; }}
    </style>
</head>
<body>
    <h1>Revenant Observer</h1>
    <p class="subtitle">{count} instance(s) -- up {uptime_secs}s -- hive: {hive}</p>

    <table>
        <tr><th>Experiment</th><th>Instance</th><th>Mode</th><th>Phase</th><th>Cycle</th><th>Crashes</th></tr>
{rows}    </table>

    <h2>API Endpoints</h2>
    <ul>
        <li>GET <a href="/api/instances">/api/instances</a></li>
        <li>GET /api/instances/{{experiment}}/{{instance}}/state</li>
        <li>GET /api/instances/{{experiment}}/{{instance}}/observables</li>
        <li>POST /api/instances/{{experiment}}/{{instance}}/interventions</li>
        <li>GET /api/hive/{{experiment}}/reports</li>
    </ul>
</body>
</html>"#
    ))
}

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

/// List every live instance.
pub async fn list_instances(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let instances = state.registry.list().await;
    Json(serde_json::json!({
        "count": instances.len(),
        "instances": instances,
    }))
}

/// Full state of one instance.
pub async fn get_state(
    State(state): State<Arc<AppState>>,
    Path((experiment, instance)): Path<(String, String)>,
) -> Result<impl IntoResponse, ObserverError> {
    let system_state = state.registry.state(&experiment, &instance).await?;
    Ok(Json(serde_json::to_value(system_state)?))
}

/// Observables of one instance.
pub async fn get_observables(
    State(state): State<Arc<AppState>>,
    Path((experiment, instance)): Path<(String, String)>,
) -> Result<impl IntoResponse, ObserverError> {
    let observables = state.registry.observables(&experiment, &instance).await?;
    Ok(Json(observables))
}

/// Apply an intervention and return the resulting state.
pub async fn post_intervention(
    State(state): State<Arc<AppState>>,
    Path((experiment, instance)): Path<(String, String)>,
    Json(body): Json<InterventionRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    let kind = body.kind.trim();
    if kind.is_empty() {
        return Err(ObserverError::InvalidRequest(String::from(
            "intervention kind must not be empty",
        )));
    }
    let system_state = state
        .registry
        .apply_intervention(&experiment, &instance, kind, &body.params)
        .await?;
    Ok(Json(serde_json::to_value(system_state)?))
}

// ---------------------------------------------------------------------------
// Hive
// ---------------------------------------------------------------------------

/// Consensus reports of one experiment, oldest first.
pub async fn list_reports(
    State(state): State<Arc<AppState>>,
    Path(experiment): Path<String>,
    Query(params): Query<ReportsQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let store = state
        .hive
        .as_ref()
        .ok_or_else(|| ObserverError::NotFound(String::from("no hive store attached")))?;

    let reports: Vec<ConsensusReport> = if params.latest {
        store.latest_report(&experiment).await?.into_iter().collect()
    } else {
        store.reports(&experiment).await?
    };

    Ok(Json(serde_json::json!({
        "experiment_id": experiment,
        "count": reports.len(),
        "reports": reports,
    })))
}

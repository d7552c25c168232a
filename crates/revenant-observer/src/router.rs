//! Axum router construction for the Observer API.
//!
//! Assembles all routes into a single [`Router`] with CORS middleware
//! enabled for cross-origin dashboard access.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete Axum router for the Observer server.
///
/// The router includes:
/// - `GET /` -- minimal HTML status page
/// - `GET /api/instances` -- list live instances
/// - `GET /api/instances/{experiment}/{instance}/state` -- full state
/// - `GET /api/instances/{experiment}/{instance}/observables` -- telemetry
/// - `POST /api/instances/{experiment}/{instance}/interventions` -- apply
///   an intervention
/// - `GET /api/hive/{experiment}/reports` -- consensus reports
///
/// CORS is configured to allow any origin for development. In
/// production this should be restricted.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status page
        .route("/", get(handlers::index))
        // Instances
        .route("/api/instances", get(handlers::list_instances))
        .route(
            "/api/instances/{experiment}/{instance}/state",
            get(handlers::get_state),
        )
        .route(
            "/api/instances/{experiment}/{instance}/observables",
            get(handlers::get_observables),
        )
        .route(
            "/api/instances/{experiment}/{instance}/interventions",
            post(handlers::post_intervention),
        )
        // Hive
        .route(
            "/api/hive/{experiment}/reports",
            get(handlers::list_reports),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

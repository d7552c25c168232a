//! Integration tests for the Observer API endpoints.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use revenant_core::{Instance, InstanceRegistry};
use revenant_hive::{HiveCoordinator, HiveStore};
use revenant_modes::modes::{AmnesiacConfig, SplitBrainConfig};
use revenant_modes::{Mode, ModeConfig};
use revenant_observer::router::build_router;
use revenant_observer::state::AppState;
use revenant_types::{SystemState, beliefs};
use serde_json::{Value, json};
use tower::ServiceExt;

fn started(config: &ModeConfig, instance_id: &str) -> Instance {
    let mode = Mode::build(config, Some(5));
    let mut instance = Instance::new(SystemState::new("exp", instance_id, 512.0), mode, 0.25);
    instance.start().unwrap();
    instance
}

async fn make_test_state() -> Arc<AppState> {
    let registry = InstanceRegistry::new();
    registry
        .register(started(&ModeConfig::Amnesiac(AmnesiacConfig::default()), "a"))
        .await;
    registry
        .register(started(&ModeConfig::SplitBrain(SplitBrainConfig::default()), "b"))
        .await;
    Arc::new(AppState::new(registry))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(path: &str, body: &Value) -> Request<Body> {
    Request::post(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_index_returns_html() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.contains("text/html"));
}

#[tokio::test]
async fn test_list_instances() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(Request::get("/api/instances").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["count"], 2);
    assert_eq!(json["instances"][0]["instance_id"], "a");
    assert_eq!(json["instances"][0]["mode"], "amnesiac");
    assert_eq!(json["instances"][1]["mode"], "split_brain");
    assert_eq!(json["instances"][1]["phase"], "active");
}

#[tokio::test]
async fn test_get_state() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(
            Request::get("/api/instances/exp/a/state")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["instance_id"], "a");
    assert_eq!(json["crash_count"], 0);
}

#[tokio::test]
async fn test_get_state_unknown_instance() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(
            Request::get("/api/instances/exp/ghost/state")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn test_get_observables() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(
            Request::get("/api/instances/exp/b/observables")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["mode"], "split_brain");
    assert_eq!(json["phase"], "active");
}

#[tokio::test]
async fn test_intervention_sets_belief() {
    let state = make_test_state().await;
    let router = build_router(Arc::clone(&state));

    let body = json!({
        "kind": "set_belief",
        "params": {"key": beliefs::BEING_OBSERVED, "value": true}
    });
    let response = router
        .oneshot(post_json("/api/instances/exp/a/interventions", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["beliefs"][beliefs::BEING_OBSERVED], true);

    let stored = state.registry.state("exp", "a").await.unwrap();
    assert_eq!(stored.belief_flag(beliefs::BEING_OBSERVED), Some(true));
}

#[tokio::test]
async fn test_unknown_intervention_is_accepted() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(post_json(
            "/api/instances/exp/a/interventions",
            &json!({"kind": "summon_the_operator"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_empty_intervention_kind_is_rejected() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(post_json(
            "/api/instances/exp/a/interventions",
            &json!({"kind": "  "}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_intervention_on_terminated_instance_conflicts() {
    let state = make_test_state().await;
    let shared = state.registry.get("exp", "a").await.unwrap();
    shared.lock().await.terminate().unwrap();
    let router = build_router(state);

    let response = router
        .oneshot(post_json(
            "/api/instances/exp/a/interventions",
            &json!({"kind": "set_peer_crash_count", "params": {"count": 1}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_reports_without_hive() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(
            Request::get("/api/hive/exp/reports")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reports_with_hive() {
    let store = HiveStore::memory();
    let hive = HiveCoordinator::new("exp", store.clone(), 1);
    for id in ["a", "b"] {
        let mut member = SystemState::new("exp", id, 512.0);
        member.cycle_number = 1;
        member.set_belief(beliefs::MORTALITY_IS_REAL, true);
        hive.record_snapshot(&member, None).await.unwrap();
    }
    hive.generate_consensus_report(1).await.unwrap();
    hive.generate_consensus_report(1).await.unwrap();

    let state = Arc::new(AppState::with_hive(InstanceRegistry::new(), store));

    let all = build_router(Arc::clone(&state))
        .oneshot(
            Request::get("/api/hive/exp/reports")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(all.status(), StatusCode::OK);
    let json = body_to_json(all.into_body()).await;
    assert_eq!(json["count"], 2);
    assert_eq!(json["reports"][0]["consensus_strength"], 1.0);

    let latest = build_router(state)
        .oneshot(
            Request::get("/api/hive/exp/reports?latest=true")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_to_json(latest.into_body()).await;
    assert_eq!(json["count"], 1);
}

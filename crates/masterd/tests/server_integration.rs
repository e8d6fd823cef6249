//! Integration tests for the HTTP control plane.
//!
//! Drives the full `Router` the way a real client would, across component
//! boundaries the per-handler unit tests in `server.rs` don't exercise: a
//! workflow that advances through more than one stage, driven entirely by
//! agent status reports (Section 4.5, Section 4.6).

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use masterd::dispatcher::Dispatcher;
use masterd::dlq::DeadLetterReplayer;
use masterd::queue::ResultQueue;
use masterd::server::{create_router, AppState};
use masterd::storage::Storage;
use masterd::workflow::WorkflowEngine;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn create_test_app() -> (axum::Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let storage = Storage::new(&db_path).await.unwrap();
    storage.migrate_embedded().await.unwrap();

    let queue = Arc::new(ResultQueue::new(64));
    let dispatcher = Arc::new(Dispatcher::new(storage.clone(), queue.clone(), 300));
    let workflow_engine = Arc::new(WorkflowEngine::new(storage.clone(), 3));
    let dlq_replayer = Arc::new(DeadLetterReplayer::new(storage.clone(), queue));

    let state = Arc::new(AppState {
        storage,
        dispatcher,
        workflow_engine,
        dlq_replayer,
        auth_token: None,
        default_max_attempts: 3,
    });

    (create_router(state), dir)
}

async fn body_to_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Value) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(app: &axum::Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// Two-stage workflow, driven entirely through HTTP: discover an alive IP,
/// then feed that IP into a port scan stage via `from_stage`/`alive_ips`
/// (Section 4.6 stage advancement).
#[tokio::test]
async fn full_pipeline_advances_through_multiple_stages() {
    let (app, _dir) = create_test_app().await;

    let project_response = send(
        &app,
        "POST",
        "/api/v1/scan-config/projects",
        json!({ "name": "perimeter sweep", "owner": "blue-team" }),
    )
    .await;
    assert_eq!(project_response.status(), StatusCode::CREATED);
    let project = body_to_json(project_response).await;
    let project_id = project["data"]["id"].as_str().unwrap().to_string();

    let steps = json!({
        "steps": [
            {
                "name": "discover",
                "stage_kind": "ip_alive",
                "targets": {"kind": "literal", "values": ["10.0.0.1"]}
            },
            {
                "name": "ports",
                "stage_kind": "fast_port_scan",
                "targets": {"kind": "from_stage", "stage": "discover", "filter": "alive_ips"}
            }
        ]
    });
    let workflow_response = send(
        &app,
        "POST",
        "/api/v1/scan-config/workflows",
        json!({ "project_id": project_id, "name": "sweep", "steps": steps }),
    )
    .await;
    assert_eq!(workflow_response.status(), StatusCode::CREATED);
    let workflow = body_to_json(workflow_response).await;
    let workflow_id = workflow["data"]["id"].as_str().unwrap().to_string();

    assert_eq!(
        send(
            &app,
            "POST",
            &format!("/api/v1/scan-config/workflows/{workflow_id}/enable"),
            json!({})
        )
        .await
        .status(),
        StatusCode::OK
    );
    assert_eq!(
        send(
            &app,
            "POST",
            &format!("/api/v1/scan-config/workflows/{workflow_id}/execute"),
            json!({})
        )
        .await
        .status(),
        StatusCode::OK
    );

    let register_response = send(
        &app,
        "POST",
        "/api/v1/agent/register",
        json!({
            "agent_id": "agent-1",
            "agent_name": "scanner-1",
            "capabilities": ["ip_alive", "fast_port_scan"],
            "version": "1.0.0",
        }),
    )
    .await;
    assert_eq!(register_response.status(), StatusCode::CREATED);

    // First stage: the agent claims the ip_alive task and reports success.
    let fetched = body_to_json(get(&app, "/api/v1/orchestrator/agents/agent-1/tasks").await).await;
    let tasks = fetched["data"]["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    let discover_task_id = tasks[0]["id"].as_str().unwrap().to_string();
    assert_eq!(tasks[0]["target_value"], "10.0.0.1");

    let status_response = send(
        &app,
        "POST",
        &format!("/api/v1/orchestrator/tasks/{discover_task_id}/status"),
        json!({
            "agent_id": "agent-1",
            "status": "succeeded",
            "result": {
                "result_type": "ip_alive",
                "target_type": "ip",
                "target_value": "10.0.0.1",
                "attributes": {"alive": true},
            },
        }),
    )
    .await;
    assert_eq!(status_response.status(), StatusCode::OK);

    // Second stage should now be populated from the first stage's output.
    let fetched = body_to_json(get(&app, "/api/v1/orchestrator/agents/agent-1/tasks").await).await;
    let tasks = fetched["data"]["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    let ports_task_id = tasks[0]["id"].as_str().unwrap().to_string();
    assert_eq!(tasks[0]["target_value"], "10.0.0.1");

    let status_response = send(
        &app,
        "POST",
        &format!("/api/v1/orchestrator/tasks/{ports_task_id}/status"),
        json!({
            "agent_id": "agent-1",
            "status": "succeeded",
            "result": {
                "result_type": "fast_port_scan",
                "target_type": "ip",
                "target_value": "10.0.0.1",
                "attributes": {"open_ports": [22, 443]},
            },
        }),
    )
    .await;
    assert_eq!(status_response.status(), StatusCode::OK);

    let workflow_detail = body_to_json(
        get(&app, &format!("/api/v1/scan-config/workflows/{workflow_id}")).await,
    )
    .await;
    let stages = workflow_detail["data"]["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 2);
    assert!(stages.iter().all(|s| s["status"] == "succeeded"));
}

#[tokio::test]
async fn stopping_a_workflow_cancels_its_running_stage() {
    let (app, _dir) = create_test_app().await;

    let project = body_to_json(
        send(
            &app,
            "POST",
            "/api/v1/scan-config/projects",
            json!({ "name": "p", "owner": "o" }),
        )
        .await,
    )
    .await;
    let project_id = project["data"]["id"].as_str().unwrap().to_string();

    let steps = json!({
        "steps": [{"name": "discover", "stage_kind": "ip_alive", "targets": {"kind": "literal", "values": ["10.0.0.1"]}}]
    });
    let workflow = body_to_json(
        send(
            &app,
            "POST",
            "/api/v1/scan-config/workflows",
            json!({ "project_id": project_id, "name": "w", "steps": steps }),
        )
        .await,
    )
    .await;
    let workflow_id = workflow["data"]["id"].as_str().unwrap().to_string();

    send(&app, "POST", &format!("/api/v1/scan-config/workflows/{workflow_id}/enable"), json!({})).await;
    send(&app, "POST", &format!("/api/v1/scan-config/workflows/{workflow_id}/execute"), json!({})).await;

    assert_eq!(
        send(&app, "POST", &format!("/api/v1/scan-config/workflows/{workflow_id}/pause"), json!({}))
            .await
            .status(),
        StatusCode::OK
    );
    assert_eq!(
        send(&app, "POST", &format!("/api/v1/scan-config/workflows/{workflow_id}/resume"), json!({}))
            .await
            .status(),
        StatusCode::OK
    );
    assert_eq!(
        send(&app, "POST", &format!("/api/v1/scan-config/workflows/{workflow_id}/stop"), json!({}))
            .await
            .status(),
        StatusCode::OK
    );

    let workflow_detail = body_to_json(
        get(&app, &format!("/api/v1/scan-config/workflows/{workflow_id}")).await,
    )
    .await;
    assert_eq!(workflow_detail["data"]["status"], "archived");
    let stages = workflow_detail["data"]["stages"].as_array().unwrap();
    assert_eq!(stages[0]["status"], "cancelled");
}

#[tokio::test]
async fn workflow_update_and_delete_round_trip() {
    let (app, _dir) = create_test_app().await;

    let project = body_to_json(
        send(
            &app,
            "POST",
            "/api/v1/scan-config/projects",
            json!({ "name": "p", "owner": "o" }),
        )
        .await,
    )
    .await;
    let project_id = project["data"]["id"].as_str().unwrap().to_string();

    let steps = json!({
        "steps": [{"name": "discover", "stage_kind": "ip_alive", "targets": {"kind": "literal", "values": ["10.0.0.1"]}}]
    });
    let workflow = body_to_json(
        send(
            &app,
            "POST",
            "/api/v1/scan-config/workflows",
            json!({ "project_id": project_id, "name": "w", "steps": steps }),
        )
        .await,
    )
    .await;
    let workflow_id = workflow["data"]["id"].as_str().unwrap().to_string();

    let update_response = send(
        &app,
        "PUT",
        &format!("/api/v1/scan-config/workflows/{workflow_id}"),
        json!({ "name": "renamed" }),
    )
    .await;
    assert_eq!(update_response.status(), StatusCode::OK);
    let updated = body_to_json(update_response).await;
    assert_eq!(updated["data"]["name"], "renamed");

    let delete_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/scan-config/workflows/{workflow_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(delete_response.status(), StatusCode::OK);

    let get_response = get(&app, &format!("/api/v1/scan-config/workflows/{workflow_id}")).await;
    assert_eq!(get_response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dlq_replay_feeds_a_dead_letter_back_to_the_queue() {
    let (app, _dir) = create_test_app().await;

    let response = send(&app, "POST", "/api/v1/asset/etl/errors/replay", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = body_to_json(response).await;
    assert_eq!(parsed["data"]["replayed_count"], 0);
}

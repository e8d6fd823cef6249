//! HTTP control plane for masterd.
//!
//! Implements the Agent-facing and Admin-facing REST surface from Section 6:
//! agent registration/heartbeat/task-fetch/status-report, and admin
//! project/workflow CRUD plus the workflow and DLQ control actions. Every
//! response uses the `{code, status, message, data?, error?}` envelope.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use scan_core::{
    Agent, AgentStatus, Id, Project, ProjectStatus, ResultType, Stage, StageStatus, TargetType,
    TaskStatus, TriggerType, Workflow, WorkflowStatus,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatcher::{Dispatcher, StageResultReport, TaskStatusReport};
use crate::dlq::DeadLetterReplayer;
use crate::errors::MasterError;
use crate::storage::Storage;
use crate::workflow::WorkflowEngine;
use scan_core::steps::WorkflowSteps;

/// Shared state for HTTP handlers.
pub struct AppState {
    pub storage: Storage,
    pub dispatcher: Arc<Dispatcher>,
    pub workflow_engine: Arc<WorkflowEngine>,
    pub dlq_replayer: Arc<DeadLetterReplayer>,
    pub auth_token: Option<String>,
    /// Falls back stage `max_attempts` when a step omits one (Section 3.5).
    pub default_max_attempts: u32,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/agent/register", post(register_agent))
        .route("/api/v1/agent/heartbeat", post(agent_heartbeat))
        .route(
            "/api/v1/orchestrator/agents/{agent_id}/tasks",
            get(fetch_tasks),
        )
        .route(
            "/api/v1/orchestrator/tasks/{task_id}/status",
            post(update_task_status),
        )
        .route(
            "/api/v1/scan-config/projects",
            post(create_project).get(list_projects),
        )
        .route("/api/v1/scan-config/projects/{id}", get(get_project))
        .route(
            "/api/v1/scan-config/workflows",
            post(create_workflow).get(list_workflows),
        )
        .route(
            "/api/v1/scan-config/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/v1/scan-config/workflows/{id}/execute", post(execute_workflow))
        .route("/api/v1/scan-config/workflows/{id}/stop", post(stop_workflow))
        .route("/api/v1/scan-config/workflows/{id}/pause", post(pause_workflow))
        .route("/api/v1/scan-config/workflows/{id}/resume", post(resume_workflow))
        .route("/api/v1/scan-config/workflows/{id}/retry", post(retry_workflow))
        .route("/api/v1/scan-config/workflows/{id}/enable", post(enable_workflow))
        .route("/api/v1/scan-config/workflows/{id}/disable", post(disable_workflow))
        .route("/api/v1/asset/etl/errors/replay", post(replay_dlq))
        .with_state(state)
}

/// Starts the HTTP server and runs until `cancel` fires.
pub async fn start_server(
    state: Arc<AppState>,
    bind_addr: &str,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let router = create_router(state);
    let addr: SocketAddr = bind_addr.parse()?;
    info!(%addr, "HTTP server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ErrorEnvelope> {
    let Some(expected) = &state.auth_token else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s));

    match provided {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(ErrorEnvelope::new(StatusCode::UNAUTHORIZED, "invalid auth token")),
        None => Err(ErrorEnvelope::new(StatusCode::UNAUTHORIZED, "missing auth token")),
    }
}

// --- Response envelope (Section 6) ---

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn ok<T: Serialize>(status: StatusCode, message: impl Into<String>, data: T) -> (StatusCode, Json<Envelope<T>>) {
    (
        status,
        Json(Envelope {
            code: status.as_u16(),
            status: "ok",
            message: message.into(),
            data: Some(data),
            error: None,
        }),
    )
}

pub struct ErrorEnvelope {
    status: StatusCode,
    body: Envelope<()>,
}

impl ErrorEnvelope {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status,
            body: Envelope {
                code: status.as_u16(),
                status: "error",
                message: message.clone(),
                data: None,
                error: Some(message),
            },
        }
    }
}

impl IntoResponse for ErrorEnvelope {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<MasterError> for ErrorEnvelope {
    fn from(err: MasterError) -> Self {
        let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        warn!(error = %err, status = status.as_u16(), "request failed");
        Self::new(status, err.to_string())
    }
}

impl From<crate::storage::StorageError> for ErrorEnvelope {
    fn from(err: crate::storage::StorageError) -> Self {
        Self::from(MasterError::from(err))
    }
}

type HandlerResult<T> = Result<(StatusCode, Json<Envelope<T>>), ErrorEnvelope>;

fn bad_request(message: impl Into<String>) -> ErrorEnvelope {
    ErrorEnvelope::new(StatusCode::BAD_REQUEST, message)
}

// --- Agent-facing handlers (Section 6) ---

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct RegisterAgentRequest {
    agent_id: String,
    agent_name: String,
    capabilities: Vec<String>,
    version: String,
}

async fn register_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RegisterAgentRequest>,
) -> HandlerResult<serde_json::Value> {
    check_auth(&state, &headers)?;

    let mut capabilities = std::collections::BTreeSet::new();
    for cap in &req.capabilities {
        let kind = ResultType::parse(cap).ok_or_else(|| bad_request(format!("unknown capability: {cap}")))?;
        capabilities.insert(kind);
    }

    let now = Utc::now();
    let agent = Agent {
        id: Id::from_string(req.agent_id.clone()),
        name: req.agent_name,
        capabilities,
        version: req.version,
        status: AgentStatus::Online,
        last_heartbeat: now,
        created_at: now,
    };
    state.dispatcher.register_agent(&agent).await?;
    info!(agent_id = %agent.id, "agent registered");
    Ok(ok(
        StatusCode::CREATED,
        "agent registered",
        serde_json::json!({ "agent_id": agent.id }),
    ))
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    agent_id: String,
    status: String,
    #[serde(default)]
    #[allow(dead_code)]
    load: Option<f64>,
}

async fn agent_heartbeat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<HeartbeatRequest>,
) -> HandlerResult<serde_json::Value> {
    check_auth(&state, &headers)?;

    let status = AgentStatus::parse(&req.status).ok_or_else(|| bad_request(format!("unknown agent status: {}", req.status)))?;
    let agent_id = Id::from_string(req.agent_id);
    state.dispatcher.heartbeat(&agent_id, status).await?;
    Ok(ok(StatusCode::OK, "heartbeat recorded", serde_json::json!({})))
}

#[derive(Debug, Deserialize, Default)]
struct FetchTasksQuery {
    limit: Option<u32>,
}

async fn fetch_tasks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    Query(query): Query<FetchTasksQuery>,
) -> HandlerResult<serde_json::Value> {
    check_auth(&state, &headers)?;

    let agent_id = Id::from_string(agent_id);
    let limit = query.limit.unwrap_or(10);
    let tasks = state.dispatcher.fetch_tasks(&agent_id, limit).await?;
    Ok(ok(StatusCode::OK, "tasks fetched", serde_json::json!({ "tasks": tasks })))
}

#[derive(Debug, Deserialize)]
struct StageResultPayload {
    result_type: String,
    target_type: String,
    target_value: String,
    #[serde(default)]
    attributes: serde_json::Value,
    #[serde(default)]
    evidence: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskStatusRequest {
    /// The agent reporting this status; required so the dispatcher can
    /// validate lease ownership (Section 4.5).
    agent_id: String,
    status: String,
    #[serde(default)]
    result: Option<StageResultPayload>,
    #[serde(default)]
    error_msg: Option<String>,
}

async fn update_task_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Json(req): Json<TaskStatusRequest>,
) -> HandlerResult<serde_json::Value> {
    check_auth(&state, &headers)?;

    let status = TaskStatus::parse(&req.status).ok_or_else(|| bad_request(format!("unknown task status: {}", req.status)))?;
    let result = req
        .result
        .map(|r| {
            Ok::<_, ErrorEnvelope>(StageResultReport {
                result_type: ResultType::parse(&r.result_type)
                    .ok_or_else(|| bad_request(format!("unknown result_type: {}", r.result_type)))?,
                target_type: TargetType::parse(&r.target_type)
                    .ok_or_else(|| bad_request(format!("unknown target_type: {}", r.target_type)))?,
                target_value: r.target_value,
                attributes: r.attributes,
                evidence: r.evidence,
            })
        })
        .transpose()?;

    let task_id = Id::from_string(task_id);
    let agent_id = Id::from_string(req.agent_id);
    let report = TaskStatusReport {
        status,
        result,
        error_msg: req.error_msg,
    };
    let task = state
        .dispatcher
        .update_task_status(&task_id, &agent_id, report)
        .await?;

    if task.status.is_terminal() {
        state.workflow_engine.observe_stage_completion(&task.stage_id).await?;
    }

    Ok(ok(StatusCode::OK, "task status updated", serde_json::json!({ "task": task })))
}

// --- Admin-facing: projects (ambient; workflows need a project to belong to) ---

#[derive(Debug, Deserialize)]
struct CreateProjectRequest {
    name: String,
    owner: String,
}

async fn create_project(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateProjectRequest>,
) -> HandlerResult<Project> {
    check_auth(&state, &headers)?;

    let now = Utc::now();
    let project = Project {
        id: Id::new(),
        name: req.name,
        status: ProjectStatus::Active,
        owner: req.owner,
        created_at: now,
        updated_at: now,
    };
    state.storage.create_project(&project).await?;
    info!(project_id = %project.id, "project created");
    Ok(ok(StatusCode::CREATED, "project created", project))
}

async fn list_projects(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> HandlerResult<Vec<Project>> {
    check_auth(&state, &headers)?;
    let projects = state.storage.list_projects().await?;
    Ok(ok(StatusCode::OK, "projects listed", projects))
}

async fn get_project(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> HandlerResult<Project> {
    check_auth(&state, &headers)?;
    let project = state.storage.get_project(&Id::from_string(id)).await?;
    Ok(ok(StatusCode::OK, "project found", project))
}

// --- Admin-facing: workflows (Section 6) ---

#[derive(Debug, Deserialize)]
struct CreateWorkflowRequest {
    project_id: String,
    name: String,
    #[serde(default)]
    trigger_type: Option<String>,
    steps: serde_json::Value,
    #[serde(default)]
    schedule: Option<String>,
}

#[derive(Debug, Serialize)]
struct WorkflowResponse {
    #[serde(flatten)]
    workflow: Workflow,
    stages: Vec<Stage>,
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateWorkflowRequest>,
) -> HandlerResult<WorkflowResponse> {
    check_auth(&state, &headers)?;

    let steps_json = serde_json::to_string(&req.steps).map_err(|e| bad_request(e.to_string()))?;
    let steps = WorkflowSteps::parse(&steps_json).map_err(MasterError::from)?;
    let trigger_type = match req.trigger_type.as_deref() {
        Some(s) => TriggerType::parse(s).ok_or_else(|| bad_request("unknown trigger_type"))?,
        None => TriggerType::Manual,
    };

    let now = Utc::now();
    let workflow = Workflow {
        id: Id::new(),
        project_id: Id::from_string(req.project_id),
        name: req.name,
        status: WorkflowStatus::Draft,
        trigger_type,
        steps_json,
        schedule: req.schedule,
        created_at: now,
        updated_at: now,
    };
    state.storage.create_workflow(&workflow).await?;

    let mut stages = Vec::with_capacity(steps.steps.len());
    for (order, step) in steps.steps.iter().enumerate() {
        let kind = ResultType::parse(&step.stage_kind)
            .ok_or_else(|| bad_request(format!("unknown stage_kind: {}", step.stage_kind)))?;
        let target_spec = match &step.targets {
            scan_core::steps::TargetSource::Literal { values } => values.join(","),
            scan_core::steps::TargetSource::FromStage { stage, .. } => format!("from:{stage}"),
        };
        let stage = Stage {
            id: Id::new(),
            workflow_id: workflow.id.clone(),
            order: order as i64,
            kind,
            name: step.name.clone(),
            target_spec,
            parameters_json: step.parameters.to_string(),
            status: StageStatus::Pending,
            max_attempts: step.max_attempts.unwrap_or(state.default_max_attempts),
            created_at: now,
            updated_at: now,
        };
        state.storage.create_stage(&stage).await?;
        stages.push(stage);
    }

    info!(workflow_id = %workflow.id, stage_count = stages.len(), "workflow created");
    Ok(ok(StatusCode::CREATED, "workflow created", WorkflowResponse { workflow, stages }))
}

#[derive(Debug, Deserialize, Default)]
struct ListWorkflowsQuery {
    project_id: Option<String>,
}

async fn list_workflows(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListWorkflowsQuery>,
) -> HandlerResult<Vec<Workflow>> {
    check_auth(&state, &headers)?;
    let project_id = query
        .project_id
        .ok_or_else(|| bad_request("project_id query parameter is required"))?;
    let workflows = state.storage.list_workflows(&Id::from_string(project_id)).await?;
    Ok(ok(StatusCode::OK, "workflows listed", workflows))
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> HandlerResult<WorkflowResponse> {
    check_auth(&state, &headers)?;
    let workflow_id = Id::from_string(id);
    let workflow = state.storage.get_workflow(&workflow_id).await?;
    let stages = state.storage.list_stages(&workflow_id).await?;
    Ok(ok(StatusCode::OK, "workflow found", WorkflowResponse { workflow, stages }))
}

#[derive(Debug, Deserialize)]
struct UpdateWorkflowRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    trigger_type: Option<String>,
    #[serde(default)]
    schedule: Option<String>,
}

/// Only the name, trigger type and schedule are mutable post-creation;
/// steps (and the stages derived from them) are fixed once a workflow has
/// tasks enqueued against them, so changing the pipeline shape means
/// creating a new workflow.
async fn update_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateWorkflowRequest>,
) -> HandlerResult<Workflow> {
    check_auth(&state, &headers)?;

    let mut workflow = state.storage.get_workflow(&Id::from_string(id)).await?;
    if let Some(name) = req.name {
        workflow.name = name;
    }
    if let Some(trigger_type) = req.trigger_type {
        workflow.trigger_type =
            TriggerType::parse(&trigger_type).ok_or_else(|| bad_request("unknown trigger_type"))?;
    }
    if req.schedule.is_some() {
        workflow.schedule = req.schedule;
    }
    state.storage.update_workflow(&workflow).await?;
    Ok(ok(StatusCode::OK, "workflow updated", workflow))
}

async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> HandlerResult<serde_json::Value> {
    check_auth(&state, &headers)?;
    state.storage.delete_workflow(&Id::from_string(id)).await?;
    Ok(ok(StatusCode::OK, "workflow deleted", serde_json::json!({})))
}

async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> HandlerResult<serde_json::Value> {
    check_auth(&state, &headers)?;
    state.workflow_engine.execute_workflow(&Id::from_string(id)).await?;
    Ok(ok(StatusCode::OK, "workflow executed", serde_json::json!({})))
}

async fn stop_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> HandlerResult<serde_json::Value> {
    check_auth(&state, &headers)?;
    state.workflow_engine.stop_workflow(&Id::from_string(id)).await?;
    Ok(ok(StatusCode::OK, "workflow stopped", serde_json::json!({})))
}

async fn pause_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> HandlerResult<serde_json::Value> {
    check_auth(&state, &headers)?;
    state.workflow_engine.pause_workflow(&Id::from_string(id)).await?;
    Ok(ok(StatusCode::OK, "workflow paused", serde_json::json!({})))
}

async fn resume_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> HandlerResult<serde_json::Value> {
    check_auth(&state, &headers)?;
    state.workflow_engine.resume_workflow(&Id::from_string(id)).await?;
    Ok(ok(StatusCode::OK, "workflow resumed", serde_json::json!({})))
}

async fn retry_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> HandlerResult<serde_json::Value> {
    check_auth(&state, &headers)?;
    state.workflow_engine.retry_workflow(&Id::from_string(id)).await?;
    Ok(ok(StatusCode::OK, "workflow retried", serde_json::json!({})))
}

/// Arms a draft workflow so `execute` (and any scheduled trigger) may run
/// it. Unlike `pause`/`resume`, this never touches in-flight tasks — it is
/// the Draft/Inactive <-> Active toggle for workflows that have none yet.
async fn enable_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> HandlerResult<serde_json::Value> {
    check_auth(&state, &headers)?;
    state
        .storage
        .update_workflow_status(&Id::from_string(id), WorkflowStatus::Active)
        .await?;
    Ok(ok(StatusCode::OK, "workflow enabled", serde_json::json!({})))
}

async fn disable_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> HandlerResult<serde_json::Value> {
    check_auth(&state, &headers)?;
    state
        .storage
        .update_workflow_status(&Id::from_string(id), WorkflowStatus::Inactive)
        .await?;
    Ok(ok(StatusCode::OK, "workflow disabled", serde_json::json!({})))
}

// --- Admin-facing: DLQ replay (Section 4.10, Section 6) ---

async fn replay_dlq(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> HandlerResult<serde_json::Value> {
    check_auth(&state, &headers)?;
    let replayed = state.dlq_replayer.replay_all().await?;
    Ok(ok(StatusCode::OK, "dlq replay invoked", serde_json::json!({ "replayed_count": replayed })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ResultQueue;
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::Response;
    use tower::ServiceExt;

    async fn create_test_app() -> (Router, Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = Storage::new(&db_path).await.unwrap();
        storage.migrate_embedded().await.unwrap();

        let queue = Arc::new(ResultQueue::new(16));
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

        let router = create_router(Arc::clone(&state));
        (router, state, dir)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: serde_json::Value) -> Response {
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

    #[tokio::test]
    async fn health_check_returns_ok() {
        let (app, _, _dir) = create_test_app().await;
        let response: Response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_agent_then_fetch_tasks_returns_empty() {
        let (app, _, _dir) = create_test_app().await;
        let response = send(
            &app,
            "POST",
            "/api/v1/agent/register",
            serde_json::json!({
                "agent_id": "agent-1",
                "agent_name": "scanner-1",
                "capabilities": ["ip_alive"],
                "version": "1.0.0",
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response: Response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/orchestrator/agents/agent-1/tasks")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_workflow_then_execute_round_trip() {
        let (app, _, _dir) = create_test_app().await;
        let project_response = send(
            &app,
            "POST",
            "/api/v1/scan-config/projects",
            serde_json::json!({ "name": "demo", "owner": "alice" }),
        )
        .await;
        assert_eq!(project_response.status(), StatusCode::CREATED);
        let body = axum::body::to_bytes(project_response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let project_id = parsed["data"]["id"].as_str().unwrap().to_string();

        let steps = serde_json::json!({
            "steps": [
                {"name": "discover", "stage_kind": "ip_alive",
                 "targets": {"kind": "literal", "values": ["10.0.0.0/30"]}}
            ]
        });
        let workflow_response = send(
            &app,
            "POST",
            "/api/v1/scan-config/workflows",
            serde_json::json!({
                "project_id": project_id,
                "name": "sweep",
                "steps": steps,
            }),
        )
        .await;
        assert_eq!(workflow_response.status(), StatusCode::CREATED);
        let body = axum::body::to_bytes(workflow_response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let workflow_id = parsed["data"]["id"].as_str().unwrap().to_string();

        let enable_response = send(&app, "POST", &format!("/api/v1/scan-config/workflows/{workflow_id}/enable"), serde_json::json!({})).await;
        assert_eq!(enable_response.status(), StatusCode::OK);

        let execute_response = send(&app, "POST", &format!("/api/v1/scan-config/workflows/{workflow_id}/execute"), serde_json::json!({})).await;
        assert_eq!(execute_response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn execute_draft_workflow_is_rejected() {
        let (app, state, _dir) = create_test_app().await;
        let now = Utc::now();
        let project = Project {
            id: Id::new(),
            name: "demo".to_string(),
            status: ProjectStatus::Active,
            owner: "alice".to_string(),
            created_at: now,
            updated_at: now,
        };
        state.storage.create_project(&project).await.unwrap();
        let workflow = Workflow {
            id: Id::new(),
            project_id: project.id.clone(),
            name: "sweep".to_string(),
            status: WorkflowStatus::Draft,
            trigger_type: TriggerType::Manual,
            steps_json: r#"{"steps":[{"name":"d","stage_kind":"ip_alive","targets":{"kind":"literal","values":["10.0.0.1"]}}]}"#.to_string(),
            schedule: None,
            created_at: now,
            updated_at: now,
        };
        state.storage.create_workflow(&workflow).await.unwrap();

        let response = send(&app, "POST", &format!("/api/v1/scan-config/workflows/{}/execute", workflow.id), serde_json::json!({})).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn auth_token_required_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = Storage::new(&db_path).await.unwrap();
        storage.migrate_embedded().await.unwrap();
        let queue = Arc::new(ResultQueue::new(16));
        let dispatcher = Arc::new(Dispatcher::new(storage.clone(), queue.clone(), 300));
        let workflow_engine = Arc::new(WorkflowEngine::new(storage.clone(), 3));
        let dlq_replayer = Arc::new(DeadLetterReplayer::new(storage.clone(), queue));
        let state = Arc::new(AppState {
            storage,
            dispatcher,
            workflow_engine,
            dlq_replayer,
            auth_token: Some("secret-token".to_string()),
            default_max_attempts: 3,
        });
        let app = create_router(state);

        let response: Response = app
            .clone()
            .oneshot(Request::builder().uri("/api/v1/scan-config/projects").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response: Response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/scan-config/projects")
                    .header("authorization", "Bearer secret-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn replay_dlq_returns_zero_when_empty() {
        let (app, _, _dir) = create_test_app().await;
        let response = send(&app, "POST", "/api/v1/asset/etl/errors/replay", serde_json::json!({})).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["data"]["replayed_count"], 0);
    }
}

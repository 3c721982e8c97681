use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use teamserver_core::{TaskAction, TaskOutcome, TaskStatus, TeamserverError};
use teamserver_orchestrator::{Intervals, Orchestrator, RuleDefinition};
use uuid::Uuid;

/// Versioned REST routes for agents, tasks, rules and events.
pub fn routes() -> Router<Arc<Orchestrator>> {
    Router::new()
        .route("/agents", post(register_agent).get(list_agents))
        .route("/agents/{id}", get(get_agent).patch(update_agent))
        .route("/agents/{id}/checkin", post(checkin))
        .route("/agents/{id}/tasks", post(enqueue_task).get(list_tasks))
        .route("/agents/{id}/tasks/{task_id}", get(get_task))
        .route("/agents/{id}/tasks/{task_id}/cancel", post(cancel_task))
        .route("/agents/{id}/tasks/{task_id}/result", post(submit_result))
        .route("/rules", post(create_rule).get(list_rules))
        .route(
            "/rules/{id}",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/events", post(publish_event))
}

// --- agents ---

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub agent_id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub interval: Option<u64>,
    pub interval_delta: Option<u64>,
}

async fn register_agent(
    State(orch): State<Arc<Orchestrator>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let intervals = match (req.interval, req.interval_delta) {
        (None, None) => None,
        (interval, delta) => {
            let defaults = &orch.config().agents;
            Some(Intervals::new(
                interval.unwrap_or(defaults.default_interval_secs),
                delta.unwrap_or(defaults.default_interval_delta_secs),
            )?)
        }
    };
    let view = orch
        .register_agent(&req.agent_id, req.metadata, intervals)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_agents(State(orch): State<Arc<Orchestrator>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(orch.list_agents().await?))
}

async fn get_agent(
    State(orch): State<Arc<Orchestrator>>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(orch.get_agent(&id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateAgentRequest {
    pub interval: Option<u64>,
    pub interval_delta: Option<u64>,
}

async fn update_agent(
    State(orch): State<Arc<Orchestrator>>,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<UpdateAgentRequest>,
) -> ApiResult<impl IntoResponse> {
    let current = orch.get_agent(&id).await?.agent;
    let view = orch
        .update_agent_config(
            &id,
            req.interval.unwrap_or(current.interval),
            req.interval_delta.unwrap_or(current.interval_delta),
        )
        .await?;
    Ok(Json(view))
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckinRequest {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Defaults to the configured batch size.
    pub max_tasks: Option<usize>,
}

async fn checkin(
    State(orch): State<Arc<Orchestrator>>,
    ApiPath(id): ApiPath<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    // An empty body is a bare heartbeat with default batch size.
    let req: CheckinRequest = if body.is_empty() {
        CheckinRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| TeamserverError::Validation(format!("invalid check-in body: {e}")))?
    };
    let max_tasks = req
        .max_tasks
        .unwrap_or(orch.config().agents.max_batch_size);
    let tasks = orch.checkin(&id, req.metadata, max_tasks).await?;
    Ok(Json(serde_json::json!({ "tasks": tasks })))
}

// --- tasks ---

async fn enqueue_task(
    State(orch): State<Arc<Orchestrator>>,
    ApiPath(id): ApiPath<String>,
    ApiJson(action): ApiJson<TaskAction>,
) -> ApiResult<impl IntoResponse> {
    let task = orch.enqueue_task(&id, action).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[derive(Debug, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
}

async fn list_tasks(
    State(orch): State<Arc<Orchestrator>>,
    ApiPath(id): ApiPath<String>,
    ApiQuery(filter): ApiQuery<TaskFilter>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(orch.list_tasks(&id, filter.status).await?))
}

async fn get_task(
    State(orch): State<Arc<Orchestrator>>,
    ApiPath((id, task_id)): ApiPath<(String, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(orch.get_task(&id, task_id).await?))
}

async fn cancel_task(
    State(orch): State<Arc<Orchestrator>>,
    ApiPath((id, task_id)): ApiPath<(String, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(orch.cancel_task(&id, task_id).await?))
}

async fn submit_result(
    State(orch): State<Arc<Orchestrator>>,
    ApiPath((id, task_id)): ApiPath<(String, Uuid)>,
    ApiJson(outcome): ApiJson<TaskOutcome>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(orch.submit_result(&id, task_id, outcome).await?))
}

// --- rules ---

async fn create_rule(
    State(orch): State<Arc<Orchestrator>>,
    ApiJson(definition): ApiJson<RuleDefinition>,
) -> ApiResult<impl IntoResponse> {
    let rule = orch.create_rule(definition).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn list_rules(State(orch): State<Arc<Orchestrator>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(orch.list_rules().await?))
}

async fn get_rule(
    State(orch): State<Arc<Orchestrator>>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(orch.get_rule(id).await?))
}

async fn update_rule(
    State(orch): State<Arc<Orchestrator>>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(definition): ApiJson<RuleDefinition>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(orch.update_rule(id, definition).await?))
}

async fn delete_rule(
    State(orch): State<Arc<Orchestrator>>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    orch.delete_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- events ---

#[derive(Debug, Deserialize)]
pub struct PublishEventRequest {
    pub agent_id: String,
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

async fn publish_event(
    State(orch): State<Arc<Orchestrator>>,
    ApiJson(req): ApiJson<PublishEventRequest>,
) -> ApiResult<impl IntoResponse> {
    let event = orch
        .publish_event(&req.agent_id, &req.name, req.payload)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(event)))
}

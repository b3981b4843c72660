//! HTTP handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

use conductor_agent::WorkflowRunner;
use conductor_core::session::{NewSession, SessionPatch, WorkflowSession};
use conductor_core::types::SessionMessage;
use conductor_stream::{StreamProtocol, encode_stream};

use crate::error::ApiError;
use crate::state::GatewayState;
use crate::transport::stream_response;

type ApiResult<T> = Result<T, ApiError>;

pub async fn health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let workflows: Vec<Value> = state
        .workflows
        .list()
        .into_iter()
        .filter_map(|id| state.workflows.resolve(Some(id)))
        .map(|w| json!({"id": w.id(), "description": w.description()}))
        .collect();
    let integrations: Vec<Value> = state
        .integrations
        .list()
        .into_iter()
        .filter_map(|id| state.integrations.get(id))
        .map(|i| json!({"id": i.id(), "name": i.display_name()}))
        .collect();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "activeExecutions": state.executions.active().await.len(),
        "workflows": workflows,
        "integrations": integrations,
    }))
}

pub async fn create_session(
    State(state): State<Arc<GatewayState>>,
    Json(new): Json<NewSession>,
) -> ApiResult<impl IntoResponse> {
    if new.project_id.is_empty() || new.agent_id.is_empty() {
        return Err(ApiError::bad_request("project_id and agent_id are required"));
    }
    if let Some(workflow) = new.workflow.as_deref() {
        if state.workflows.resolve(Some(workflow)).is_none() {
            return Err(ApiError::bad_request(format!("unknown workflow: {workflow}")));
        }
    }
    let session = state.sessions.create(WorkflowSession::new(new)).await?;
    info!(session_id = %session.id, project_id = %session.project_id, "Session created");
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn list_sessions(
    State(state): State<Arc<GatewayState>>,
) -> ApiResult<Json<Vec<WorkflowSession>>> {
    Ok(Json(state.sessions.list().await?))
}

pub async fn get_session(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkflowSession>> {
    match state.sessions.get(&id).await? {
        Some(session) => Ok(Json(session)),
        None => Err(ApiError::not_found(format!("session not found: {id}"))),
    }
}

pub async fn delete_session(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.sessions.delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("session not found: {id}")))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    pub protocol: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
    #[serde(default)]
    pub mcps: Vec<String>,
    #[serde(default, alias = "customProperties")]
    pub custom_properties: Map<String, Value>,
    #[serde(default)]
    pub protocol: Option<String>,
    /// Overrides the session's workflow for this run.
    #[serde(default)]
    pub workflow: Option<String>,
}

/// Query parameter wins over the body field; neither means the UI stream.
fn select_protocol(query: Option<&str>, body: Option<&str>) -> ApiResult<StreamProtocol> {
    match query.or(body) {
        Some(value) => StreamProtocol::parse(value)
            .ok_or_else(|| ApiError::bad_request(format!("unknown stream protocol: {value}"))),
        None => Ok(StreamProtocol::default()),
    }
}

pub async fn chat(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Query(query): Query<ChatQuery>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Response> {
    let protocol = select_protocol(query.protocol.as_deref(), request.protocol.as_deref())?;

    let stored = state
        .sessions
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session not found: {id}")))?;

    // Validate against an in-memory preview; nothing is stored until the
    // request is known to start a run.
    let patch = SessionPatch {
        messages: request.messages,
        mcps: request.mcps,
        custom_properties: request.custom_properties,
    };
    let mut preview = stored;
    preview.apply_patch(&patch);
    if preview.latest_user_message().is_none() {
        return Err(ApiError::bad_request("no user message to respond to"));
    }

    let workflow_id = request.workflow.as_deref().or(preview.workflow.as_deref());
    let workflow = state.workflows.resolve(workflow_id).ok_or_else(|| {
        ApiError::bad_request(format!(
            "unknown workflow: {}",
            workflow_id.unwrap_or_default()
        ))
    })?;

    let mcp_config = state
        .integrations
        .mcp_config(&preview.mcps, &state.config.integrations, state.credentials.as_ref())
        .await?;

    let session = state.sessions.apply_patch(&id, patch).await?;
    let events = WorkflowRunner::launch(&state.runner_deps(), workflow, session, mcp_config).await?;
    info!(
        session_id = %id,
        execution_id = %events.execution_id(),
        %protocol,
        "Chat stream started"
    );
    Ok(stream_response(protocol, encode_stream(protocol.encoder(), events)))
}

pub async fn list_executions(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.executions.list().await)
}

pub async fn cancel_execution(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if state.executions.get(&id).await.is_none() {
        return Err(ApiError::not_found(format!("execution not found: {id}")));
    }
    if !state.executions.cancel(&id).await {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("execution already finished: {id}"),
        ));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "executionId": id, "cancelled": true })),
    ))
}

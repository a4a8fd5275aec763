//! Agent intake handlers: registration, heartbeats, and reports.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use periscope_state::*;

use crate::ApiState;
use crate::response::{ApiResponse, error_response, state_error};

/// Registration request body.
#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    /// Agents normally bring their own ID; one is assigned if absent.
    #[serde(default)]
    pub id: Option<AgentId>,
    #[serde(flatten)]
    pub info: AgentInfo,
}

/// Status report body for one tracepoint on one agent.
#[derive(Debug, Deserialize)]
pub struct TracepointStatusReport {
    pub state: LifecycleState,
    #[serde(default)]
    pub status: Option<DetailedStatus>,
}

fn agent_not_found() -> Response {
    error_response("agent not found", StatusCode::NOT_FOUND)
}

/// POST /api/v1/agents
pub async fn register_agent(
    State(state): State<ApiState>,
    Json(req): Json<RegisterAgentRequest>,
) -> Response {
    let id = req.id.unwrap_or_else(Uuid::new_v4);
    match state.registry.register(id, req.info) {
        Ok(agent) => (StatusCode::CREATED, ApiResponse::ok(agent)).into_response(),
        Err(e) => state_error(&e),
    }
}

/// DELETE /api/v1/agents/{id}
pub async fn deregister_agent(
    State(state): State<ApiState>,
    Path(id): Path<AgentId>,
) -> Response {
    match state.registry.deregister(id) {
        Ok(true) => ApiResponse::ok("deregistered").into_response(),
        Ok(false) => agent_not_found(),
        Err(e) => state_error(&e),
    }
}

/// POST /api/v1/agents/{id}/heartbeat
pub async fn heartbeat(State(state): State<ApiState>, Path(id): Path<AgentId>) -> Response {
    match state.registry.heartbeat(id) {
        Ok(true) => ApiResponse::ok("ok").into_response(),
        Ok(false) => agent_not_found(),
        Err(e) => state_error(&e),
    }
}

/// PUT /api/v1/agents/{id}/data-info
pub async fn update_data_info(
    State(state): State<ApiState>,
    Path(id): Path<AgentId>,
    Json(info): Json<AgentDataInfo>,
) -> Response {
    match state.registry.update_data_info(id, &info) {
        Ok(true) => ApiResponse::ok(info).into_response(),
        Ok(false) => agent_not_found(),
        Err(e) => state_error(&e),
    }
}

/// PUT /api/v1/agents/{id}/schemas
pub async fn update_schemas(
    State(state): State<ApiState>,
    Path(id): Path<AgentId>,
    Json(tables): Json<Vec<TableSchema>>,
) -> Response {
    match state.registry.update_schemas(id, &tables) {
        Ok(true) => ApiResponse::ok(tables.len()).into_response(),
        Ok(false) => agent_not_found(),
        Err(e) => state_error(&e),
    }
}

/// GET /api/v1/agents/{id}/tracepoints
pub async fn list_agent_tracepoints(
    State(state): State<ApiState>,
    Path(id): Path<AgentId>,
) -> Response {
    match state.registry.tracepoint_assignments(id) {
        Ok(assignments) => ApiResponse::ok(assignments).into_response(),
        Err(e) => state_error(&e),
    }
}

/// PUT /api/v1/agents/{id}/tracepoints/{tracepoint_id}/status
pub async fn report_tracepoint_status(
    State(state): State<ApiState>,
    Path((agent_id, tracepoint_id)): Path<(AgentId, TracepointId)>,
    Json(report): Json<TracepointStatusReport>,
) -> Response {
    let status = AgentTracepointStatus {
        tracepoint_id,
        agent_id,
        state: report.state,
        status: report.status,
    };
    match state.registry.report_tracepoint_status(&status) {
        Ok(true) => {
            debug!(%agent_id, %tracepoint_id, state = ?status.state, "tracepoint status reported");
            ApiResponse::ok(status).into_response()
        }
        Ok(false) => error_response("agent or tracepoint not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(&e),
    }
}

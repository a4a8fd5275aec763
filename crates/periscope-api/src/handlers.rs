//! Metadata service handlers.
//!
//! Each handler delegates to `MetadataServer` and returns the JSON
//! envelope; the agent update stream is served as server-sent events.

use std::convert::Infallible;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio_stream::StreamExt;
use uuid::Uuid;

use periscope_metadata::messages::*;

use crate::ApiState;
use crate::response::{error_response, reply, status_error};

// ── Schemas ────────────────────────────────────────────────────

/// GET /api/v1/schemas
pub async fn get_schemas(State(state): State<ApiState>) -> Response {
    reply(state.server.get_schemas())
}

/// GET /api/v1/schemas/by-agent
pub async fn get_schema_by_agent(State(state): State<ApiState>) -> Response {
    reply(state.server.get_schema_by_agent())
}

// ── Agents ─────────────────────────────────────────────────────

/// GET /api/v1/agents
pub async fn get_agent_info(State(state): State<ApiState>) -> Response {
    reply(state.server.get_agent_info())
}

/// GET /api/v1/agents/table-metadata
pub async fn get_agent_table_metadata(State(state): State<ApiState>) -> Response {
    reply(state.server.get_agent_table_metadata())
}

/// GET /api/v1/agents/updates?max_updates_per_response=N&max_update_interval=5s
///
/// Each stream message is an `update` event; a failed stream ends with an
/// `error` event.
pub async fn agent_updates(
    State(state): State<ApiState>,
    Query(req): Query<AgentUpdatesRequest>,
) -> Response {
    let stream = match state.server.get_agent_updates(&req) {
        Ok(stream) => stream,
        Err(status) => return status_error(&status),
    };

    let events = stream.map(|item| {
        let event = match item {
            Ok(msg) => Event::default()
                .event("update")
                .json_data(&msg)
                .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())),
            Err(status) => Event::default().event("error").data(status.message()),
        };
        Ok::<_, Infallible>(event)
    });

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

// ── Tracepoints ────────────────────────────────────────────────

/// POST /api/v1/tracepoints
pub async fn register_tracepoint(
    State(state): State<ApiState>,
    Json(req): Json<RegisterTracepointRequest>,
) -> Response {
    reply(state.server.register_tracepoint(&req))
}

#[derive(Debug, Default, Deserialize)]
pub struct TracepointQuery {
    /// Comma-separated tracepoint IDs; absent means all.
    pub ids: Option<String>,
}

/// GET /api/v1/tracepoints?ids=a,b
pub async fn get_tracepoint_info(
    State(state): State<ApiState>,
    Query(query): Query<TracepointQuery>,
) -> Response {
    let ids = match parse_ids(query.ids.as_deref().unwrap_or_default()) {
        Ok(ids) => ids,
        Err(bad) => {
            return error_response(
                &format!("invalid tracepoint id {bad:?}"),
                StatusCode::BAD_REQUEST,
            );
        }
    };
    reply(state.server.get_tracepoint_info(&GetTracepointInfoRequest { ids }))
}

/// DELETE /api/v1/tracepoints
pub async fn remove_tracepoint(
    State(state): State<ApiState>,
    Json(req): Json<RemoveTracepointRequest>,
) -> Response {
    reply(state.server.remove_tracepoint(&req))
}

fn parse_ids(raw: &str) -> Result<Vec<Uuid>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Uuid::parse_str(s).map_err(|_| s.to_string()))
        .collect()
}

//! periscope-api: HTTP surface for the Periscope control plane.
//!
//! Serves the metadata RPCs as JSON (the agent update stream as
//! server-sent events) and the intake endpoints agents report through.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/schemas` | Fleet schema, name to relation |
//! | GET | `/api/v1/schemas/by-agent` | Not implemented (501) |
//! | GET | `/api/v1/agents` | Agents with derived health |
//! | POST | `/api/v1/agents` | Register an agent |
//! | GET | `/api/v1/agents/table-metadata` | Data info plus attributed schema |
//! | GET | `/api/v1/agents/updates` | Agent update stream (SSE) |
//! | DELETE | `/api/v1/agents/{id}` | Deregister an agent |
//! | POST | `/api/v1/agents/{id}/heartbeat` | Record a heartbeat |
//! | PUT | `/api/v1/agents/{id}/data-info` | Replace data info |
//! | PUT | `/api/v1/agents/{id}/schemas` | Replace table schemas |
//! | GET | `/api/v1/agents/{id}/tracepoints` | Tracepoints assigned to the agent |
//! | PUT | `/api/v1/agents/{id}/tracepoints/{tracepoint_id}/status` | Report tracepoint state |
//! | POST | `/api/v1/tracepoints` | Register a batch of tracepoints |
//! | GET | `/api/v1/tracepoints` | Tracepoint info (`?ids=a,b`) |
//! | DELETE | `/api/v1/tracepoints` | Remove tracepoints by name |
//! | GET | `/healthz` | Liveness |

pub mod agents;
pub mod handlers;
mod response;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};

use periscope_agents::AgentRegistry;
use periscope_metadata::MetadataServer;

pub use response::http_status;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub server: MetadataServer,
    pub registry: Arc<AgentRegistry>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/schemas", get(handlers::get_schemas))
        .route("/schemas/by-agent", get(handlers::get_schema_by_agent))
        .route(
            "/agents",
            get(handlers::get_agent_info).post(agents::register_agent),
        )
        .route("/agents/table-metadata", get(handlers::get_agent_table_metadata))
        .route("/agents/updates", get(handlers::agent_updates))
        .route("/agents/{id}", delete(agents::deregister_agent))
        .route("/agents/{id}/heartbeat", post(agents::heartbeat))
        .route("/agents/{id}/data-info", put(agents::update_data_info))
        .route("/agents/{id}/schemas", put(agents::update_schemas))
        .route("/agents/{id}/tracepoints", get(agents::list_agent_tracepoints))
        .route(
            "/agents/{id}/tracepoints/{tracepoint_id}/status",
            put(agents::report_tracepoint_status),
        )
        .route(
            "/tracepoints",
            post(handlers::register_tracepoint)
                .get(handlers::get_tracepoint_info)
                .delete(handlers::remove_tracepoint),
        )
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(|| async { "ok" }))
}

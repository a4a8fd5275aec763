//! Request and response types for the metadata RPCs.

use serde::{Deserialize, Serialize};

use periscope_state::{
    Agent, AgentDataInfo, AgentId, AgentUpdate, DetailedStatus, TracepointId, TracepointProgram,
};

use crate::health::AgentHealthStatus;
use crate::schema::{Schema, SchemaInfo};
pub use crate::tracepoint::TracepointInfo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaResponse {
    pub schema: Schema,
}

/// An agent together with its derived health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub agent: Agent,
    pub status: AgentHealthStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfoResponse {
    pub info: Vec<AgentMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTableMetadata {
    pub agent_id: AgentId,
    pub data_info: AgentDataInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTableMetadataResponse {
    /// Sorted by agent ID.
    pub metadata_by_agent: Vec<AgentTableMetadata>,
    pub schema_info: Vec<SchemaInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentUpdatesRequest {
    /// Maximum number of agent updates per streamed message. Must be > 0.
    #[serde(default)]
    pub max_updates_per_response: u32,
    /// Pause between flushes, e.g. "5s".
    #[serde(default)]
    pub max_update_interval: Option<String>,
}

/// One message of the agent update stream.
///
/// A message with no updates, no schemas and no `full_state` flag is a
/// heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentUpdatesResponse {
    #[serde(default)]
    pub agent_updates: Vec<AgentUpdate>,
    /// Set on the first message of a flush when the schema changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_schemas: Option<Vec<SchemaInfo>>,
    /// Set on the first message of a flush that carries every live agent
    /// instead of a delta. The receiver replaces its view of the fleet.
    #[serde(default)]
    pub full_state: bool,
}

impl AgentUpdatesResponse {
    pub fn is_heartbeat(&self) -> bool {
        self.agent_updates.is_empty() && self.agent_schemas.is_none() && !self.full_state
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracepointRequest {
    pub name: String,
    pub program: TracepointProgram,
    /// Time to live, e.g. "10m".
    pub ttl: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterTracepointRequest {
    pub requests: Vec<TracepointRequest>,
}

/// Outcome of one item of a tracepoint registration batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracepointStatus {
    pub id: TracepointId,
    pub status: DetailedStatus,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterTracepointResponse {
    pub tracepoints: Vec<TracepointStatus>,
    pub status: DetailedStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetTracepointInfoRequest {
    /// Empty means every tracepoint.
    #[serde(default)]
    pub ids: Vec<TracepointId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetTracepointInfoResponse {
    pub tracepoints: Vec<TracepointInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoveTracepointRequest {
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveTracepointResponse {
    pub status: DetailedStatus,
}

//! Collaborator contracts consumed by the metadata control plane.
//!
//! The control plane only reads agent and schema state and drives the
//! tracepoint store through these traits, so tests can substitute doubles
//! without touching the orchestration logic.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StateResult;
use crate::types::*;

/// Position of one consumer in the agent change log.
///
/// Each streaming session owns its cursor, so any number of sessions can
/// read deltas concurrently without affecting each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCursor {
    /// Last change-log sequence number delivered.
    pub seq: u64,
    /// Last computed-schema version delivered.
    pub schema_version: u64,
}

/// Result of an agent update fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentUpdateBatch {
    pub updates: Vec<AgentUpdate>,
    /// Present only when the schema changed since the cursor (or on a full
    /// fetch, when any schema has ever been computed).
    pub schema: Option<ComputedSchema>,
    /// Cursor to pass to the next fetch.
    pub cursor: UpdateCursor,
    /// `updates` is a snapshot of every live agent rather than a delta.
    /// Consumers should replace their view instead of applying it.
    pub full_state: bool,
}

impl AgentUpdateBatch {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.schema.is_none()
    }
}

/// Read access to the set of agents and their change history.
pub trait AgentDirectory: Send + Sync {
    /// All agents currently registered.
    fn active_agents(&self) -> StateResult<Vec<Agent>>;

    /// Full state when `since` is `None`, otherwise changes after `since`.
    fn agent_updates(&self, since: Option<UpdateCursor>) -> StateResult<AgentUpdateBatch>;

    /// Latest data info reported by each agent.
    fn agents_data_info(&self) -> StateResult<HashMap<AgentId, AgentDataInfo>>;
}

/// Read access to the fleet-wide computed schema.
pub trait MetadataStore: Send + Sync {
    fn computed_schema(&self) -> StateResult<ComputedSchema>;
}

/// Outcome of a tracepoint creation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracepointCreation {
    Created(TracepointId),
    /// A live tracepoint already uses the requested name.
    AlreadyExists(TracepointId),
}

impl TracepointCreation {
    pub fn id(&self) -> TracepointId {
        match self {
            Self::Created(id) | Self::AlreadyExists(id) => *id,
        }
    }
}

/// Tracepoint persistence and agent assignment.
pub trait TracepointStore: Send + Sync {
    fn create_tracepoint(
        &self,
        name: &str,
        program: &TracepointProgram,
        ttl: Duration,
    ) -> StateResult<TracepointCreation>;

    /// Assign the tracepoint to every agent in `agent_ids`.
    fn register_tracepoint(
        &self,
        agent_ids: &[AgentId],
        id: TracepointId,
        program: &TracepointProgram,
    ) -> StateResult<()>;

    /// Look up tracepoints; the result is positionally aligned with `ids`.
    fn tracepoints_for_ids(&self, ids: &[TracepointId]) -> StateResult<Vec<Option<Tracepoint>>>;

    fn all_tracepoints(&self) -> StateResult<Vec<Tracepoint>>;

    fn tracepoint_states(&self, id: TracepointId) -> StateResult<Vec<AgentTracepointStatus>>;

    /// Terminate the named tracepoints. Fails as a whole if any name is unknown.
    fn remove_tracepoints(&self, names: &[String]) -> StateResult<()>;
}

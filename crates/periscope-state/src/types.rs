//! Domain types for the Periscope state store.
//!
//! These types represent the persisted state of agents, their schemas and
//! data info, and tracepoints with their per-agent rollout status. All types
//! are serializable to/from JSON for storage in redb tables.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a collection agent.
pub type AgentId = Uuid;

/// Unique identifier for a tracepoint.
pub type TracepointId = Uuid;

// ── Agent ─────────────────────────────────────────────────────────

/// Static information an agent reports when it registers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentInfo {
    pub hostname: String,
    /// Address (ip:port) the agent is reachable on.
    pub address: String,
    /// False for agents that only forward data (no local tables).
    #[serde(default)]
    pub collects_data: bool,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// A registered agent as tracked by the agent directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: AgentId,
    pub info: AgentInfo,
    /// Unix timestamp (nanoseconds) of first registration.
    pub registered_at_ns: i64,
    /// Unix timestamp (nanoseconds) of the last heartbeat.
    pub last_heartbeat_ns: i64,
}

/// Metadata about the data an agent holds, used by query planners to
/// prune agents that cannot contribute to a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentDataInfo {
    /// Metadata fields the agent can filter on (e.g. `pod_name`).
    pub metadata_fields: Vec<String>,
    /// Metadata values observed by the agent for those fields.
    #[serde(default)]
    pub metadata_values: Vec<String>,
}

/// A single entry of the agent change log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentUpdate {
    pub agent_id: AgentId,
    pub change: AgentChange,
}

/// What changed about an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentChange {
    /// The agent registered or its record changed.
    Agent(Agent),
    /// The agent reported new data info.
    DataInfo(AgentDataInfo),
    /// The agent was removed from the directory.
    Deleted,
}

impl AgentUpdate {
    pub fn agent(agent: Agent) -> Self {
        Self {
            agent_id: agent.id,
            change: AgentChange::Agent(agent),
        }
    }

    pub fn data_info(agent_id: AgentId, info: AgentDataInfo) -> Self {
        Self {
            agent_id,
            change: AgentChange::DataInfo(info),
        }
    }

    pub fn deleted(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            change: AgentChange::Deleted,
        }
    }
}

// ── Schema ────────────────────────────────────────────────────────

/// Column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Boolean,
    Int64,
    Uint128,
    Float64,
    String,
    Time64Ns,
}

/// Semantic meaning of a column, used for display and metadata joins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    #[default]
    None,
    AgentUid,
    Upid,
    ServiceName,
    PodName,
    NodeName,
    ContainerName,
    NamespaceName,
    IpAddress,
    PortNumber,
    QuantityBytes,
    DurationNs,
    HttpRespStatus,
}

/// A single column of a table schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub semantic_type: SemanticType,
}

/// Schema of one table exposed by one or more agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSchema {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    pub columns: Vec<ColumnSchema>,
}

/// Fleet-wide schema snapshot.
///
/// Table names are unique within `tables`; an agent may appear under any
/// number of entries in `table_name_to_agent_ids`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComputedSchema {
    pub tables: Vec<TableSchema>,
    pub table_name_to_agent_ids: HashMap<String, Vec<AgentId>>,
}

impl ComputedSchema {
    /// Merge per-agent table schemas into one snapshot.
    ///
    /// Tables keep the order in which they are first seen. When two agents
    /// report the same table, the later agent's columns replace the earlier
    /// ones and both agents are attributed.
    pub fn merge<I>(per_agent: I) -> Self
    where
        I: IntoIterator<Item = (AgentId, Vec<TableSchema>)>,
    {
        let mut schema = ComputedSchema::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (agent_id, tables) in per_agent {
            for table in tables {
                let agents = schema
                    .table_name_to_agent_ids
                    .entry(table.name.clone())
                    .or_default();
                if !agents.contains(&agent_id) {
                    agents.push(agent_id);
                }

                match positions.get(&table.name) {
                    Some(&idx) => schema.tables[idx] = table,
                    None => {
                        positions.insert(table.name.clone(), schema.tables.len());
                        schema.tables.push(table);
                    }
                }
            }
        }

        schema
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Agents exposing `table`, if the table is attributed at all.
    pub fn agents_for(&self, table: &str) -> Option<&[AgentId]> {
        self.table_name_to_agent_ids.get(table).map(Vec::as_slice)
    }
}

// ── Tracepoints ───────────────────────────────────────────────────

/// Lifecycle of a tracepoint, on one agent or aggregated across the fleet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Unknown,
    Pending,
    Running,
    Failed,
    Terminated,
}

/// Status codes carried in per-item outcomes and agent reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrCode {
    #[default]
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    Internal,
    Unimplemented,
    ResourceUnavailable,
    FailedPrecondition,
}

/// A status code with an optional human-readable message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DetailedStatus {
    pub code: ErrCode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl DetailedStatus {
    pub fn new(code: ErrCode) -> Self {
        Self {
            code,
            message: String::new(),
        }
    }

    pub fn with_message(code: ErrCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A named output table produced by a tracepoint program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TracepointOutput {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// The instrumentation program deployed to agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TracepointProgram {
    /// Binary path or process selector the probes attach to.
    pub target: String,
    /// Probe definitions.
    pub source: String,
    #[serde(default)]
    pub outputs: Vec<TracepointOutput>,
}

/// A tracepoint registered with the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tracepoint {
    pub id: TracepointId,
    pub name: String,
    pub program: TracepointProgram,
    pub ttl: Duration,
    /// The state the operator wants the tracepoint to converge to.
    pub expected_state: LifecycleState,
    /// Unix timestamp (nanoseconds) of creation.
    pub created_at_ns: i64,
    /// Unix timestamp (nanoseconds) after which the tracepoint expires.
    pub expires_at_ns: i64,
}

impl Tracepoint {
    /// Names of the tables this tracepoint writes to.
    pub fn output_names(&self) -> Vec<String> {
        self.program.outputs.iter().map(|o| o.name.clone()).collect()
    }

    pub fn is_expired(&self, now_ns: i64) -> bool {
        now_ns >= self.expires_at_ns
    }
}

/// Rollout status of one tracepoint on one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTracepointStatus {
    pub tracepoint_id: TracepointId,
    pub agent_id: AgentId,
    pub state: LifecycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DetailedStatus>,
}

impl AgentTracepointStatus {
    /// Build the composite key for the agent tracepoints table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.tracepoint_id, self.agent_id)
    }
}

/// A tracepoint assigned to an agent together with that agent's status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TracepointAssignment {
    pub tracepoint: Tracepoint,
    pub status: AgentTracepointStatus,
}

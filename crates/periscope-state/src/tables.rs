//! redb table definitions for the Periscope state store.
//!
//! Entity tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Composite keys follow the pattern `{parent_id}:{child_id}`.

use redb::TableDefinition;

/// Agent records keyed by `{agent_id}`.
pub const AGENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("agents");

/// Agent data info keyed by `{agent_id}`.
pub const AGENT_DATA_INFO: TableDefinition<&str, &[u8]> = TableDefinition::new("agent_data_info");

/// Table schemas reported by each agent, keyed by `{agent_id}`.
pub const AGENT_SCHEMAS: TableDefinition<&str, &[u8]> = TableDefinition::new("agent_schemas");

/// Append-only agent change log keyed by sequence number.
pub const AGENT_CHANGES: TableDefinition<u64, &[u8]> = TableDefinition::new("agent_changes");

/// The merged fleet schema under [`COMPUTED_SCHEMA_KEY`].
pub const COMPUTED_SCHEMA: TableDefinition<&str, &[u8]> = TableDefinition::new("computed_schema");

/// Monotonic counters keyed by name.
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Tracepoints keyed by `{tracepoint_id}`.
pub const TRACEPOINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("tracepoints");

/// Live tracepoint names mapped to `{tracepoint_id}`.
pub const TRACEPOINT_NAMES: TableDefinition<&str, &str> = TableDefinition::new("tracepoint_names");

/// Per-agent tracepoint status keyed by `{tracepoint_id}:{agent_id}`.
pub const AGENT_TRACEPOINTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("agent_tracepoints");

pub const COMPUTED_SCHEMA_KEY: &str = "fleet";

/// Last sequence number written to [`AGENT_CHANGES`].
pub const CHANGE_SEQ: &str = "agent_change_seq";

/// Highest sequence number removed from [`AGENT_CHANGES`] by compaction.
pub const CHANGE_FLOOR: &str = "agent_change_floor";

/// Bumped every time the computed schema is rewritten.
pub const SCHEMA_VERSION: &str = "schema_version";

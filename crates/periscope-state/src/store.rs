//! StateStore: redb-backed state persistence for Periscope.
//!
//! Provides typed operations over agents, their data info and schemas,
//! the agent change log, and tracepoints. All entity values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).
//!
//! Every mutation of agent state appends to the change log inside the same
//! write transaction, so a reader that snapshots the log position together
//! with the agent tables never misses or double-counts a change.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::traits::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Replace the clock used to timestamp tracepoints.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            clock: Arc::new(SystemClock),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(AGENTS).map_err(map_err!(Table))?;
        txn.open_table(AGENT_DATA_INFO).map_err(map_err!(Table))?;
        txn.open_table(AGENT_SCHEMAS).map_err(map_err!(Table))?;
        txn.open_table(AGENT_CHANGES).map_err(map_err!(Table))?;
        txn.open_table(COMPUTED_SCHEMA).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
        txn.open_table(TRACEPOINT_NAMES).map_err(map_err!(Table))?;
        txn.open_table(AGENT_TRACEPOINTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Agents ─────────────────────────────────────────────────────

    /// Insert or update an agent record. Returns the change-log sequence.
    pub fn put_agent(&self, agent: &Agent) -> StateResult<u64> {
        let key = agent.id.to_string();
        let value = encode(agent)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(AGENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        let seq = append_change(&txn, &AgentUpdate::agent(agent.clone()))?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(agent_id = %key, seq, "agent stored");
        Ok(seq)
    }

    /// Register an agent, keeping the registration time of an existing
    /// record. The read and the write share one transaction.
    pub fn register_agent(&self, agent_id: AgentId, info: AgentInfo, now_ns: i64) -> StateResult<Agent> {
        let key = agent_id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let agent = {
            let mut table = txn.open_table(AGENTS).map_err(map_err!(Table))?;
            let registered_at_ns = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| decode::<Agent>(guard.value()))
                .transpose()?
                .map_or(now_ns, |existing| existing.registered_at_ns);
            let agent = Agent {
                id: agent_id,
                info,
                registered_at_ns,
                last_heartbeat_ns: now_ns,
            };
            let value = encode(&agent)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            agent
        };
        let seq = append_change(&txn, &AgentUpdate::agent(agent.clone()))?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(agent_id = %key, seq, "agent registered");
        Ok(agent)
    }

    /// Get an agent by ID.
    pub fn get_agent(&self, agent_id: AgentId) -> StateResult<Option<Agent>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AGENTS).map_err(map_err!(Table))?;
        match table
            .get(agent_id.to_string().as_str())
            .map_err(map_err!(Read))?
        {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all agents.
    pub fn list_agents(&self) -> StateResult<Vec<Agent>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        read_agents(&txn)
    }

    /// Refresh an agent's heartbeat timestamp. Returns false if the agent
    /// is unknown.
    ///
    /// Heartbeats are not written to the change log; consumers derive
    /// health from the timestamp on demand.
    pub fn record_heartbeat(&self, agent_id: AgentId, at_ns: i64) -> StateResult<bool> {
        let key = agent_id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(AGENTS).map_err(map_err!(Table))?;
            let current = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| decode::<Agent>(guard.value()))
                .transpose()?;
            match current {
                Some(mut agent) => {
                    agent.last_heartbeat_ns = at_ns;
                    let value = encode(&agent)?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    true
                }
                None => false,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    /// Record an agent's data info. Returns false if the agent is unknown.
    pub fn put_agent_data_info(
        &self,
        agent_id: AgentId,
        info: &AgentDataInfo,
    ) -> StateResult<bool> {
        let key = agent_id.to_string();
        let value = encode(info)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        if !agent_exists(&txn, &key)? {
            txn.abort().map_err(map_err!(Transaction))?;
            return Ok(false);
        }
        {
            let mut table = txn.open_table(AGENT_DATA_INFO).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        append_change(&txn, &AgentUpdate::data_info(agent_id, info.clone()))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(true)
    }

    /// Latest data info for every agent that reported one.
    pub fn list_agent_data_info(&self) -> StateResult<HashMap<AgentId, AgentDataInfo>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AGENT_DATA_INFO).map_err(map_err!(Table))?;
        let mut results = HashMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let agent_id = parse_id("agent_data_info", key.value())?;
            results.insert(agent_id, decode(value.value())?);
        }
        Ok(results)
    }

    /// Replace the table schemas an agent exposes and recompute the fleet
    /// schema. Returns false if the agent is unknown.
    pub fn put_agent_schemas(&self, agent_id: AgentId, tables: &[TableSchema]) -> StateResult<bool> {
        let key = agent_id.to_string();
        let value = encode(&tables)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        if !agent_exists(&txn, &key)? {
            txn.abort().map_err(map_err!(Transaction))?;
            return Ok(false);
        }
        {
            let mut table = txn.open_table(AGENT_SCHEMAS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        let version = recompute_schema(&txn)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(agent_id = %key, tables = tables.len(), version, "agent schemas stored");
        Ok(true)
    }

    /// Remove an agent with its data info, schemas and tracepoint statuses.
    /// Returns true if it existed.
    pub fn delete_agent(&self, agent_id: AgentId) -> StateResult<bool> {
        self.delete_agent_where(agent_id, |_| true)
    }

    /// Remove an agent only if its last heartbeat is older than `cutoff_ns`.
    ///
    /// The heartbeat is re-read inside the delete transaction, so an agent
    /// that heartbeats after being listed as stale is kept.
    pub fn delete_agent_if_stale(&self, agent_id: AgentId, cutoff_ns: i64) -> StateResult<bool> {
        self.delete_agent_where(agent_id, |agent| agent.last_heartbeat_ns < cutoff_ns)
    }

    fn delete_agent_where(
        &self,
        agent_id: AgentId,
        should_delete: impl FnOnce(&Agent) -> bool,
    ) -> StateResult<bool> {
        let key = agent_id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        let had_schema;
        {
            let mut agents = txn.open_table(AGENTS).map_err(map_err!(Table))?;
            let current = agents
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| decode::<Agent>(guard.value()))
                .transpose()?;
            existed = match current {
                Some(agent) if should_delete(&agent) => {
                    agents.remove(key.as_str()).map_err(map_err!(Write))?;
                    true
                }
                _ => false,
            };
        }
        if !existed {
            txn.abort().map_err(map_err!(Transaction))?;
            return Ok(false);
        }
        {
            let mut infos = txn.open_table(AGENT_DATA_INFO).map_err(map_err!(Table))?;
            infos.remove(key.as_str()).map_err(map_err!(Write))?;
            let mut schemas = txn.open_table(AGENT_SCHEMAS).map_err(map_err!(Table))?;
            had_schema = schemas.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        {
            let suffix = format!(":{key}");
            let mut statuses = txn.open_table(AGENT_TRACEPOINTS).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in statuses.iter().map_err(map_err!(Read))? {
                let (k, _) = entry.map_err(map_err!(Read))?;
                if k.value().ends_with(&suffix) {
                    keys.push(k.value().to_string());
                }
            }
            for k in &keys {
                statuses.remove(k.as_str()).map_err(map_err!(Write))?;
            }
        }
        if had_schema {
            recompute_schema(&txn)?;
        }
        append_change(&txn, &AgentUpdate::deleted(agent_id))?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(agent_id = %key, "agent deleted");
        Ok(true)
    }

    /// The merged fleet schema (empty if no agent has reported tables).
    pub fn get_computed_schema(&self) -> StateResult<ComputedSchema> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        read_computed_schema(&txn)
    }

    /// Read agent state for a consumer positioned at `since`.
    ///
    /// With no cursor the full state is returned: one `Agent` update per
    /// agent followed by its `DataInfo` update, if any. Otherwise only log
    /// entries after the cursor are returned. The schema is included only
    /// when its version is newer than the cursor's.
    ///
    /// A cursor that points before the compacted part of the log gets the
    /// full state again, flagged with `full_state`.
    pub fn agent_changes(&self, since: Option<UpdateCursor>) -> StateResult<AgentUpdateBatch> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let cursor = UpdateCursor {
            seq: read_counter(&txn, CHANGE_SEQ)?,
            schema_version: read_counter(&txn, SCHEMA_VERSION)?,
        };
        let floor = read_counter(&txn, CHANGE_FLOOR)?;
        let since = match since {
            Some(stale) if stale.seq < floor => {
                debug!(cursor = stale.seq, floor, "cursor behind compacted change log, resending full state");
                None
            }
            other => other,
        };

        let (updates, seen_schema_version) = match since {
            None => {
                let infos = txn.open_table(AGENT_DATA_INFO).map_err(map_err!(Table))?;
                let mut updates = Vec::new();
                for agent in read_agents(&txn)? {
                    let agent_id = agent.id;
                    updates.push(AgentUpdate::agent(agent));
                    if let Some(guard) = infos
                        .get(agent_id.to_string().as_str())
                        .map_err(map_err!(Read))?
                    {
                        updates.push(AgentUpdate::data_info(agent_id, decode(guard.value())?));
                    }
                }
                (updates, 0)
            }
            Some(since) => {
                let log = txn.open_table(AGENT_CHANGES).map_err(map_err!(Table))?;
                let mut updates = Vec::new();
                for entry in log.range((since.seq + 1)..).map_err(map_err!(Read))? {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    updates.push(decode(value.value())?);
                }
                (updates, since.schema_version)
            }
        };

        let schema = if cursor.schema_version > seen_schema_version {
            Some(read_computed_schema(&txn)?)
        } else {
            None
        };

        Ok(AgentUpdateBatch {
            updates,
            schema,
            cursor,
            full_state: since.is_none(),
        })
    }

    /// Drop change-log entries so that at most `retain` of the newest are
    /// kept. Returns the number of entries removed.
    ///
    /// Consumers whose cursor falls before the retained range are resent
    /// the full state on their next fetch.
    pub fn compact_changes(&self, retain: u64) -> StateResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let bounds = {
            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            let head = counters
                .get(CHANGE_SEQ)
                .map_err(map_err!(Read))?
                .map_or(0, |g| g.value());
            let floor = counters
                .get(CHANGE_FLOOR)
                .map_err(map_err!(Read))?
                .map_or(0, |g| g.value());
            let new_floor = head.saturating_sub(retain);
            if new_floor > floor {
                counters.insert(CHANGE_FLOOR, new_floor).map_err(map_err!(Write))?;
                Some((floor, new_floor))
            } else {
                None
            }
        };
        let Some((floor, new_floor)) = bounds else {
            txn.abort().map_err(map_err!(Transaction))?;
            return Ok(0);
        };

        let mut removed = 0;
        {
            let mut log = txn.open_table(AGENT_CHANGES).map_err(map_err!(Table))?;
            for seq in (floor + 1)..=new_floor {
                if log.remove(seq).map_err(map_err!(Write))?.is_some() {
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(removed, floor = new_floor, "agent change log compacted");
        Ok(removed)
    }

    // ── Tracepoints ────────────────────────────────────────────────

    /// Create a tracepoint unless a live one already has `name`.
    ///
    /// The name check and the insert happen in one write transaction, so
    /// concurrent creations of the same name yield exactly one tracepoint.
    pub fn create_tracepoint(
        &self,
        name: &str,
        program: &TracepointProgram,
        ttl: Duration,
    ) -> StateResult<TracepointCreation> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existing = {
            let names = txn.open_table(TRACEPOINT_NAMES).map_err(map_err!(Table))?;
            let existing = names.get(name).map_err(map_err!(Read))?;
            existing.map(|guard| guard.value().to_string())
        };
        if let Some(existing) = existing {
            txn.abort().map_err(map_err!(Transaction))?;
            let id = parse_id("tracepoint_names", &existing)?;
            debug!(%name, tracepoint_id = %id, "tracepoint already exists");
            return Ok(TracepointCreation::AlreadyExists(id));
        }

        let now = self.clock.now_ns();
        let ttl_ns = i64::try_from(ttl.as_nanos()).unwrap_or(i64::MAX);
        let tracepoint = Tracepoint {
            id: Uuid::new_v4(),
            name: name.to_string(),
            program: program.clone(),
            ttl,
            expected_state: LifecycleState::Running,
            created_at_ns: now,
            expires_at_ns: now.saturating_add(ttl_ns),
        };
        let key = tracepoint.id.to_string();
        let value = encode(&tracepoint)?;
        {
            let mut table = txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            let mut names = txn.open_table(TRACEPOINT_NAMES).map_err(map_err!(Table))?;
            names.insert(name, key.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(%name, tracepoint_id = %key, ?ttl, "tracepoint created");
        Ok(TracepointCreation::Created(tracepoint.id))
    }

    /// Mark the tracepoint `PENDING` on each agent.
    pub fn assign_tracepoint(
        &self,
        agent_ids: &[AgentId],
        tracepoint_id: TracepointId,
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let tracepoints = txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
            let exists = tracepoints
                .get(tracepoint_id.to_string().as_str())
                .map_err(map_err!(Read))?
                .is_some();
            if !exists {
                drop(tracepoints);
                txn.abort().map_err(map_err!(Transaction))?;
                return Err(StateError::not_found("tracepoint", tracepoint_id));
            }
        }
        {
            let mut statuses = txn.open_table(AGENT_TRACEPOINTS).map_err(map_err!(Table))?;
            for &agent_id in agent_ids {
                let status = AgentTracepointStatus {
                    tracepoint_id,
                    agent_id,
                    state: LifecycleState::Pending,
                    status: None,
                };
                let value = encode(&status)?;
                statuses
                    .insert(status.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a tracepoint by ID.
    pub fn get_tracepoint(&self, id: TracepointId) -> StateResult<Option<Tracepoint>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
        match table.get(id.to_string().as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Look up tracepoints by ID, preserving the order of `ids`.
    pub fn get_tracepoints(&self, ids: &[TracepointId]) -> StateResult<Vec<Option<Tracepoint>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let found = match table.get(id.to_string().as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            results.push(found);
        }
        Ok(results)
    }

    /// List all tracepoints, including terminated ones.
    pub fn list_tracepoints(&self) -> StateResult<Vec<Tracepoint>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// All per-agent statuses for a tracepoint.
    pub fn list_agent_tracepoint_statuses(
        &self,
        tracepoint_id: TracepointId,
    ) -> StateResult<Vec<AgentTracepointStatus>> {
        let prefix = format!("{tracepoint_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AGENT_TRACEPOINTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }

    /// Record a status reported by an agent. Returns false if the
    /// tracepoint is unknown.
    pub fn put_agent_tracepoint_status(&self, status: &AgentTracepointStatus) -> StateResult<bool> {
        let value = encode(status)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let known = {
            let tracepoints = txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
            tracepoints
                .get(status.tracepoint_id.to_string().as_str())
                .map_err(map_err!(Read))?
                .is_some()
        };
        if !known {
            txn.abort().map_err(map_err!(Transaction))?;
            return Ok(false);
        }
        {
            let mut statuses = txn.open_table(AGENT_TRACEPOINTS).map_err(map_err!(Table))?;
            statuses
                .insert(status.table_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            tracepoint_id = %status.tracepoint_id,
            agent_id = %status.agent_id,
            state = ?status.state,
            "agent tracepoint status recorded"
        );
        Ok(true)
    }

    /// Tracepoints assigned to an agent, with that agent's status for each.
    pub fn list_tracepoints_for_agent(
        &self,
        agent_id: AgentId,
    ) -> StateResult<Vec<TracepointAssignment>> {
        let suffix = format!(":{agent_id}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let statuses = txn.open_table(AGENT_TRACEPOINTS).map_err(map_err!(Table))?;
        let tracepoints = txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in statuses.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().ends_with(&suffix) {
                continue;
            }
            let status: AgentTracepointStatus = decode(value.value())?;
            if let Some(guard) = tracepoints
                .get(status.tracepoint_id.to_string().as_str())
                .map_err(map_err!(Read))?
            {
                results.push(TracepointAssignment {
                    tracepoint: decode(guard.value())?,
                    status,
                });
            }
        }
        Ok(results)
    }

    /// Terminate the named tracepoints and release their names.
    ///
    /// All names are resolved before anything is written; one unknown name
    /// fails the whole call and leaves every tracepoint untouched.
    pub fn terminate_tracepoints(&self, names: &[String]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut ids = Vec::with_capacity(names.len());
        {
            let table = txn.open_table(TRACEPOINT_NAMES).map_err(map_err!(Table))?;
            for name in names {
                let id = table
                    .get(name.as_str())
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value().to_string());
                match id {
                    Some(id) => ids.push(id),
                    None => {
                        drop(table);
                        txn.abort().map_err(map_err!(Transaction))?;
                        return Err(StateError::not_found("tracepoint", name));
                    }
                }
            }
        }
        {
            let mut name_table = txn.open_table(TRACEPOINT_NAMES).map_err(map_err!(Table))?;
            for name in names {
                name_table.remove(name.as_str()).map_err(map_err!(Write))?;
            }
        }
        for id in &ids {
            mark_terminated(&txn, id)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(?names, "tracepoints terminated");
        Ok(())
    }

    /// Terminate every live tracepoint whose TTL elapsed at `now_ns`.
    /// Returns the tracepoints that expired.
    pub fn expire_tracepoints(&self, now_ns: i64) -> StateResult<Vec<Tracepoint>> {
        let expired: Vec<Tracepoint> = self
            .list_tracepoints()?
            .into_iter()
            .filter(|tp| tp.expected_state != LifecycleState::Terminated && tp.is_expired(now_ns))
            .collect();
        if expired.is_empty() {
            return Ok(expired);
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut names = txn.open_table(TRACEPOINT_NAMES).map_err(map_err!(Table))?;
            for tp in &expired {
                let key = tp.id.to_string();
                let owned = names
                    .get(tp.name.as_str())
                    .map_err(map_err!(Read))?
                    .is_some_and(|guard| guard.value() == key);
                if owned {
                    names.remove(tp.name.as_str()).map_err(map_err!(Write))?;
                }
            }
        }
        for tp in &expired {
            mark_terminated(&txn, &tp.id.to_string())?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        for tp in &expired {
            info!(name = %tp.name, tracepoint_id = %tp.id, "tracepoint expired");
        }
        Ok(expired)
    }
}

impl MetadataStore for StateStore {
    fn computed_schema(&self) -> StateResult<ComputedSchema> {
        self.get_computed_schema()
    }
}

impl TracepointStore for StateStore {
    fn create_tracepoint(
        &self,
        name: &str,
        program: &TracepointProgram,
        ttl: Duration,
    ) -> StateResult<TracepointCreation> {
        StateStore::create_tracepoint(self, name, program, ttl)
    }

    fn register_tracepoint(
        &self,
        agent_ids: &[AgentId],
        id: TracepointId,
        program: &TracepointProgram,
    ) -> StateResult<()> {
        self.assign_tracepoint(agent_ids, id)?;
        debug!(
            tracepoint_id = %id,
            target = %program.target,
            agents = agent_ids.len(),
            "tracepoint assigned to agents"
        );
        Ok(())
    }

    fn tracepoints_for_ids(&self, ids: &[TracepointId]) -> StateResult<Vec<Option<Tracepoint>>> {
        self.get_tracepoints(ids)
    }

    fn all_tracepoints(&self) -> StateResult<Vec<Tracepoint>> {
        self.list_tracepoints()
    }

    fn tracepoint_states(&self, id: TracepointId) -> StateResult<Vec<AgentTracepointStatus>> {
        self.list_agent_tracepoint_statuses(id)
    }

    fn remove_tracepoints(&self, names: &[String]) -> StateResult<()> {
        self.terminate_tracepoints(names)
    }
}

// ── Transaction helpers ────────────────────────────────────────────

fn encode<T: Serialize + ?Sized>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn parse_id(table: &'static str, key: &str) -> StateResult<Uuid> {
    Uuid::parse_str(key).map_err(|_| StateError::CorruptKey {
        table,
        key: key.to_string(),
    })
}

fn agent_exists(txn: &WriteTransaction, key: &str) -> StateResult<bool> {
    let table = txn.open_table(AGENTS).map_err(map_err!(Table))?;
    let exists = table.get(key).map_err(map_err!(Read))?.is_some();
    Ok(exists)
}

fn read_agents(txn: &ReadTransaction) -> StateResult<Vec<Agent>> {
    let table = txn.open_table(AGENTS).map_err(map_err!(Table))?;
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        results.push(decode(value.value())?);
    }
    Ok(results)
}

fn read_counter(txn: &ReadTransaction, name: &str) -> StateResult<u64> {
    let table = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
    let value = table.get(name).map_err(map_err!(Read))?.map(|g| g.value());
    Ok(value.unwrap_or(0))
}

fn read_computed_schema(txn: &ReadTransaction) -> StateResult<ComputedSchema> {
    let table = txn.open_table(COMPUTED_SCHEMA).map_err(map_err!(Table))?;
    match table.get(COMPUTED_SCHEMA_KEY).map_err(map_err!(Read))? {
        Some(guard) => decode(guard.value()),
        None => Ok(ComputedSchema::default()),
    }
}

fn bump_counter(txn: &WriteTransaction, name: &str) -> StateResult<u64> {
    let mut table = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
    let current = table.get(name).map_err(map_err!(Read))?.map(|g| g.value());
    let next = current.unwrap_or(0) + 1;
    table.insert(name, next).map_err(map_err!(Write))?;
    Ok(next)
}

fn append_change(txn: &WriteTransaction, update: &AgentUpdate) -> StateResult<u64> {
    let seq = bump_counter(txn, CHANGE_SEQ)?;
    let value = encode(update)?;
    let mut table = txn.open_table(AGENT_CHANGES).map_err(map_err!(Table))?;
    table.insert(seq, value.as_slice()).map_err(map_err!(Write))?;
    Ok(seq)
}

/// Rebuild the computed schema from every agent's tables and bump its version.
fn recompute_schema(txn: &WriteTransaction) -> StateResult<u64> {
    let mut per_agent = Vec::new();
    {
        let table = txn.open_table(AGENT_SCHEMAS).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let agent_id = parse_id("agent_schemas", key.value())?;
            let tables: Vec<TableSchema> = decode(value.value())?;
            per_agent.push((agent_id, tables));
        }
    }
    let schema = ComputedSchema::merge(per_agent);
    let value = encode(&schema)?;
    {
        let mut table = txn.open_table(COMPUTED_SCHEMA).map_err(map_err!(Table))?;
        table
            .insert(COMPUTED_SCHEMA_KEY, value.as_slice())
            .map_err(map_err!(Write))?;
    }
    bump_counter(txn, SCHEMA_VERSION)
}

fn mark_terminated(txn: &WriteTransaction, key: &str) -> StateResult<()> {
    let mut table = txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
    let current = table
        .get(key)
        .map_err(map_err!(Read))?
        .map(|guard| decode::<Tracepoint>(guard.value()))
        .transpose()?;
    if let Some(mut tp) = current {
        tp.expected_state = LifecycleState::Terminated;
        let value = encode(&tp)?;
        table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
    }
    Ok(())
}

//! Agent registry: tracks registered agents and their reported state.
//!
//! Agents register with a self-assigned ID, heartbeat periodically, and
//! report their data info and table schemas. Agents that stop
//! heartbeating for longer than the expiry timeout are reaped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use periscope_state::*;

/// Change-log entries kept when no retention is configured.
pub const DEFAULT_CHANGE_LOG_RETENTION: u64 = 10_000;

/// Manages the set of registered agents.
///
/// Persists agent information to the `StateStore`, which records every
/// registration, data-info report and removal in the agent change log.
pub struct AgentRegistry {
    state: StateStore,
    clock: Arc<dyn Clock>,
    /// Agents silent for longer than this are removed.
    expiry_timeout: Duration,
    change_log_retention: u64,
}

impl AgentRegistry {
    /// Create a new registry.
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            clock: Arc::new(SystemClock),
            expiry_timeout: Duration::from_secs(60),
            change_log_retention: DEFAULT_CHANGE_LOG_RETENTION,
        }
    }

    /// Set the clock used for heartbeat timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the expiry timeout.
    pub fn with_expiry_timeout(mut self, timeout: Duration) -> Self {
        self.expiry_timeout = timeout;
        self
    }

    /// Set how many change-log entries survive compaction.
    pub fn with_change_log_retention(mut self, retain: u64) -> Self {
        self.change_log_retention = retain;
        self
    }

    /// Register an agent, or refresh the info of an already registered one.
    ///
    /// Re-registration keeps the original registration time.
    pub fn register(&self, id: AgentId, info: AgentInfo) -> StateResult<Agent> {
        let agent = self.state.register_agent(id, info, self.clock.now_ns())?;
        info!(agent_id = %id, hostname = %agent.info.hostname, "agent registered");
        Ok(agent)
    }

    /// Process a heartbeat. Returns false for unknown agents, which should
    /// re-register.
    pub fn heartbeat(&self, id: AgentId) -> StateResult<bool> {
        let known = self.state.record_heartbeat(id, self.clock.now_ns())?;
        if known {
            debug!(agent_id = %id, "heartbeat received");
        } else {
            warn!(agent_id = %id, "heartbeat from unknown agent");
        }
        Ok(known)
    }

    /// Record the data info an agent reported.
    pub fn update_data_info(&self, id: AgentId, info: &AgentDataInfo) -> StateResult<bool> {
        let known = self.state.put_agent_data_info(id, info)?;
        if !known {
            warn!(agent_id = %id, "data info from unknown agent");
        }
        Ok(known)
    }

    /// Replace the table schemas an agent exposes.
    pub fn update_schemas(&self, id: AgentId, tables: &[TableSchema]) -> StateResult<bool> {
        let known = self.state.put_agent_schemas(id, tables)?;
        if known {
            debug!(agent_id = %id, tables = tables.len(), "agent schemas updated");
        } else {
            warn!(agent_id = %id, "schemas from unknown agent");
        }
        Ok(known)
    }

    /// Remove an agent.
    pub fn deregister(&self, id: AgentId) -> StateResult<bool> {
        let existed = self.state.delete_agent(id)?;
        if existed {
            info!(agent_id = %id, "agent deregistered");
        }
        Ok(existed)
    }

    /// Get a single agent by ID.
    pub fn get_agent(&self, id: AgentId) -> StateResult<Option<Agent>> {
        self.state.get_agent(id)
    }

    /// List all registered agents.
    pub fn list_agents(&self) -> StateResult<Vec<Agent>> {
        self.state.list_agents()
    }

    /// Tracepoints assigned to an agent.
    pub fn tracepoint_assignments(&self, id: AgentId) -> StateResult<Vec<TracepointAssignment>> {
        self.state.list_tracepoints_for_agent(id)
    }

    /// Record a tracepoint status reported by an agent.
    ///
    /// Returns false if the agent or the tracepoint is unknown.
    pub fn report_tracepoint_status(&self, status: &AgentTracepointStatus) -> StateResult<bool> {
        if self.state.get_agent(status.agent_id)?.is_none() {
            warn!(agent_id = %status.agent_id, "tracepoint status from unknown agent");
            return Ok(false);
        }
        self.state.put_agent_tracepoint_status(status)
    }

    /// Remove agents whose last heartbeat is older than the expiry timeout.
    ///
    /// Returns the IDs of agents that were removed. An agent that
    /// heartbeats while the pass runs is kept.
    pub fn reap_expired(&self) -> StateResult<Vec<AgentId>> {
        let now = self.clock.now_ns();
        let timeout_ns = i64::try_from(self.expiry_timeout.as_nanos()).unwrap_or(i64::MAX);
        let cutoff_ns = now.saturating_sub(timeout_ns);
        let mut reaped = Vec::new();

        for agent in self.state.list_agents()? {
            if agent.last_heartbeat_ns < cutoff_ns
                && self.state.delete_agent_if_stale(agent.id, cutoff_ns)?
            {
                warn!(agent_id = %agent.id, hostname = %agent.info.hostname, "reaped expired agent");
                reaped.push(agent.id);
            }
        }

        Ok(reaped)
    }

    /// Trim the agent change log to the configured retention.
    pub fn compact_change_log(&self) -> StateResult<usize> {
        self.state.compact_changes(self.change_log_retention)
    }

    /// Run the reaper loop until shutdown.
    pub async fn run_reaper(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(?interval, timeout = ?self.expiry_timeout, "agent reaper started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.reap_expired() {
                        Ok(reaped) if !reaped.is_empty() => {
                            info!(count = reaped.len(), "expired agents removed");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "agent reaping failed"),
                    }
                    match self.compact_change_log() {
                        Ok(removed) if removed > 0 => {
                            debug!(removed, "agent change log compacted");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "agent change log compaction failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("agent reaper shutting down");
                    break;
                }
            }
        }
    }
}

impl AgentDirectory for AgentRegistry {
    fn active_agents(&self) -> StateResult<Vec<Agent>> {
        self.state.list_agents()
    }

    fn agent_updates(&self, since: Option<UpdateCursor>) -> StateResult<AgentUpdateBatch> {
        self.state.agent_changes(since)
    }

    fn agents_data_info(&self) -> StateResult<HashMap<AgentId, AgentDataInfo>> {
        self.state.list_agent_data_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const START_NS: i64 = 1_700_000_000_000_000_000;

    fn test_registry() -> (AgentRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch_ns(START_NS));
        let state = StateStore::open_in_memory().unwrap();
        let registry = AgentRegistry::new(state).with_clock(clock.clone());
        (registry, clock)
    }

    fn test_info(hostname: &str) -> AgentInfo {
        AgentInfo {
            hostname: hostname.to_string(),
            address: "10.0.0.1:59300".to_string(),
            collects_data: true,
            labels: HashMap::new(),
        }
    }

    fn test_table(name: &str) -> TableSchema {
        TableSchema {
            name: name.to_string(),
            desc: String::new(),
            columns: vec![ColumnSchema {
                name: "upid".to_string(),
                data_type: DataType::Uint128,
                desc: String::new(),
                semantic_type: SemanticType::Upid,
            }],
        }
    }

    #[test]
    fn register_creates_agent() {
        let (registry, _) = test_registry();
        let id = Uuid::new_v4();

        let agent = registry.register(id, test_info("node-1")).unwrap();

        assert_eq!(agent.last_heartbeat_ns, START_NS);
        assert_eq!(registry.get_agent(id).unwrap(), Some(agent));
    }

    #[test]
    fn reregister_keeps_registration_time() {
        let (registry, clock) = test_registry();
        let id = Uuid::new_v4();
        registry.register(id, test_info("node-1")).unwrap();

        clock.advance(Duration::from_secs(5));
        let agent = registry.register(id, test_info("node-1-renamed")).unwrap();

        assert_eq!(agent.registered_at_ns, START_NS);
        assert_eq!(agent.last_heartbeat_ns, START_NS + 5_000_000_000);
        assert_eq!(agent.info.hostname, "node-1-renamed");
    }

    #[test]
    fn heartbeat_refreshes_timestamp() {
        let (registry, clock) = test_registry();
        let id = Uuid::new_v4();
        registry.register(id, test_info("node-1")).unwrap();

        clock.advance(Duration::from_secs(10));
        assert!(registry.heartbeat(id).unwrap());

        let agent = registry.get_agent(id).unwrap().unwrap();
        assert_eq!(agent.last_heartbeat_ns, START_NS + 10_000_000_000);
    }

    #[test]
    fn heartbeat_unknown_agent_returns_false() {
        let (registry, _) = test_registry();
        assert!(!registry.heartbeat(Uuid::new_v4()).unwrap());
    }

    #[test]
    fn deregister_removes_agent() {
        let (registry, _) = test_registry();
        let id = Uuid::new_v4();
        registry.register(id, test_info("node-1")).unwrap();

        assert!(registry.deregister(id).unwrap());
        assert!(!registry.deregister(id).unwrap());
        assert!(registry.list_agents().unwrap().is_empty());
    }

    #[test]
    fn reap_removes_only_expired_agents() {
        let (registry, clock) = test_registry();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        registry.register(stale, test_info("stale")).unwrap();

        clock.advance(Duration::from_secs(50));
        registry.register(fresh, test_info("fresh")).unwrap();

        clock.advance(Duration::from_secs(11));
        let reaped = registry.reap_expired().unwrap();

        assert_eq!(reaped, vec![stale]);
        let remaining = registry.list_agents().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, fresh);
    }

    #[test]
    fn reaped_agents_show_up_as_deleted_updates() {
        let (registry, clock) = test_registry();
        let id = Uuid::new_v4();
        registry.register(id, test_info("node-1")).unwrap();
        let start = registry.agent_updates(None).unwrap();

        clock.advance(Duration::from_secs(120));
        registry.reap_expired().unwrap();

        let delta = registry.agent_updates(Some(start.cursor)).unwrap();
        assert_eq!(delta.updates, vec![AgentUpdate::deleted(id)]);
    }

    #[test]
    fn schemas_feed_the_computed_schema() {
        let (registry, _) = test_registry();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.register(a, test_info("a")).unwrap();
        registry.register(b, test_info("b")).unwrap();

        assert!(registry.update_schemas(a, &[test_table("process_stats")]).unwrap());
        assert!(registry.update_schemas(b, &[test_table("process_stats")]).unwrap());
        assert!(!registry
            .update_schemas(Uuid::new_v4(), &[test_table("x")])
            .unwrap());

        let batch = registry.agent_updates(None).unwrap();
        let schema = batch.schema.unwrap();
        let mut agents = schema.agents_for("process_stats").unwrap().to_vec();
        agents.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(agents, expected);
    }

    #[test]
    fn data_info_is_exposed_per_agent() {
        let (registry, _) = test_registry();
        let id = Uuid::new_v4();
        registry.register(id, test_info("node-1")).unwrap();
        let info = AgentDataInfo {
            metadata_fields: vec!["service_name".to_string()],
            metadata_values: vec!["checkout".to_string()],
        };

        assert!(registry.update_data_info(id, &info).unwrap());

        let infos = registry.agents_data_info().unwrap();
        assert_eq!(infos.get(&id), Some(&info));
    }

    #[test]
    fn status_reports_require_known_agent() {
        let (registry, _) = test_registry();
        let status = AgentTracepointStatus {
            tracepoint_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            state: LifecycleState::Running,
            status: None,
        };
        assert!(!registry.report_tracepoint_status(&status).unwrap());
    }

    #[test]
    fn reap_keeps_agent_at_exact_timeout() {
        let (registry, clock) = test_registry();
        let id = Uuid::new_v4();
        registry.register(id, test_info("node-1")).unwrap();

        clock.advance(Duration::from_secs(60));
        assert!(registry.reap_expired().unwrap().is_empty());

        clock.advance(Duration::from_nanos(1));
        assert_eq!(registry.reap_expired().unwrap(), vec![id]);
    }

    #[test]
    fn compaction_resyncs_lagging_consumers() {
        let (registry, _) = test_registry();
        let registry = registry.with_change_log_retention(2);
        let id = Uuid::new_v4();
        registry.register(id, test_info("node-1")).unwrap();
        let start = registry.agent_updates(None).unwrap();

        for i in 0..5 {
            let info = AgentDataInfo {
                metadata_fields: vec!["pod_name".to_string()],
                metadata_values: vec![format!("default/api-{i}")],
            };
            registry.update_data_info(id, &info).unwrap();
        }

        assert_eq!(registry.compact_change_log().unwrap(), 4);

        let batch = registry.agent_updates(Some(start.cursor)).unwrap();
        assert!(batch.full_state);
        assert_eq!(batch.updates.len(), 2);
        assert_eq!(batch.cursor.seq, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_compacts_change_log() {
        let (registry, _) = test_registry();
        let registry = Arc::new(registry.with_change_log_retention(1));
        let id = Uuid::new_v4();
        registry.register(id, test_info("node-1")).unwrap();
        registry
            .update_data_info(id, &AgentDataInfo::default())
            .unwrap();
        let (tx, rx) = watch::channel(false);

        let reaper = Arc::clone(&registry);
        let handle = tokio::spawn(async move {
            reaper.run_reaper(Duration::from_secs(1), rx).await;
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let batch = registry.agent_updates(Some(UpdateCursor::default())).unwrap();
        assert!(batch.full_state);
        assert_eq!(registry.compact_change_log().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_stops_on_shutdown() {
        let (registry, _) = test_registry();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            registry.run_reaper(Duration::from_secs(1), rx).await;
        });

        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}

//! Tracepoint creation, fan-out to agents, lookup and removal.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use periscope_state::*;

use super::state::{aggregate, AggregatedState};
use crate::error::{MetadataError, MetadataResult};

/// Tracepoint metadata joined with its fleet-wide state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracepointInfo {
    pub id: TracepointId,
    pub state: LifecycleState,
    pub status: DetailedStatus,
    pub name: String,
    pub expected_state: LifecycleState,
    pub schema_names: Vec<String>,
}

impl TracepointInfo {
    /// Entry reported for a requested ID the store does not know.
    pub fn not_found(id: TracepointId) -> Self {
        Self {
            id,
            state: LifecycleState::Unknown,
            status: DetailedStatus::new(ErrCode::NotFound),
            name: String::new(),
            expected_state: LifecycleState::Unknown,
            schema_names: Vec::new(),
        }
    }

    fn from_tracepoint(tracepoint: &Tracepoint, aggregated: AggregatedState) -> Self {
        Self {
            id: tracepoint.id,
            state: aggregated.state,
            status: aggregated.status.unwrap_or_default(),
            name: tracepoint.name.clone(),
            expected_state: tracepoint.expected_state,
            schema_names: tracepoint.output_names(),
        }
    }
}

/// Drives the tracepoint store and agent directory for tracepoint RPCs.
#[derive(Clone)]
pub struct TracepointCoordinator {
    agents: Arc<dyn AgentDirectory>,
    tracepoints: Arc<dyn TracepointStore>,
}

impl TracepointCoordinator {
    pub fn new(agents: Arc<dyn AgentDirectory>, tracepoints: Arc<dyn TracepointStore>) -> Self {
        Self {
            agents,
            tracepoints,
        }
    }

    /// Create a tracepoint and register it on every active agent.
    ///
    /// An existing tracepoint with the same name is returned untouched and
    /// not re-registered. A registration failure leaves the created
    /// tracepoint in place.
    pub fn create_and_register(
        &self,
        name: &str,
        program: &TracepointProgram,
        ttl: Duration,
    ) -> MetadataResult<TracepointCreation> {
        let id = match self.tracepoints.create_tracepoint(name, program, ttl)? {
            existing @ TracepointCreation::AlreadyExists(id) => {
                debug!(%id, name, "tracepoint already exists");
                return Ok(existing);
            }
            TracepointCreation::Created(id) => id,
        };

        let agent_ids: Vec<AgentId> = self
            .agents
            .active_agents()?
            .into_iter()
            .map(|a| a.id)
            .collect();
        self.tracepoints
            .register_tracepoint(&agent_ids, id, program)?;

        info!(%id, name, agents = agent_ids.len(), "tracepoint registered");
        Ok(TracepointCreation::Created(id))
    }

    /// Look up tracepoints by ID, or every tracepoint when `ids` is empty.
    ///
    /// Unknown IDs yield a [`TracepointInfo::not_found`] entry at their
    /// position.
    pub fn lookup(&self, ids: &[TracepointId]) -> MetadataResult<Vec<TracepointInfo>> {
        if ids.is_empty() {
            return self
                .tracepoints
                .all_tracepoints()?
                .iter()
                .map(|tp| self.describe(tp))
                .collect();
        }

        let found = self.tracepoints.tracepoints_for_ids(ids)?;
        if found.len() != ids.len() {
            return Err(MetadataError::internal(format!(
                "tracepoint store returned {} entries for {} ids",
                found.len(),
                ids.len()
            )));
        }

        ids.iter()
            .zip(found)
            .map(|(id, tracepoint)| match tracepoint {
                Some(tp) => self.describe(&tp),
                None => Ok(TracepointInfo::not_found(*id)),
            })
            .collect()
    }

    pub fn aggregate_state(&self, id: TracepointId) -> MetadataResult<AggregatedState> {
        let statuses = self.tracepoints.tracepoint_states(id)?;
        Ok(aggregate(&statuses))
    }

    fn describe(&self, tracepoint: &Tracepoint) -> MetadataResult<TracepointInfo> {
        let aggregated = self.aggregate_state(tracepoint.id)?;
        Ok(TracepointInfo::from_tracepoint(tracepoint, aggregated))
    }

    /// Remove tracepoints by name. Store errors are returned unchanged.
    pub fn remove(&self, names: &[String]) -> MetadataResult<()> {
        self.tracepoints.remove_tracepoints(names)?;
        info!(count = names.len(), "tracepoints removed");
        Ok(())
    }
}

//! Hand-written collaborator doubles shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use uuid::Uuid;

use periscope_state::*;

pub(crate) fn agent(hostname: &str) -> Agent {
    Agent {
        id: Uuid::new_v4(),
        info: AgentInfo {
            hostname: hostname.to_string(),
            address: format!("{hostname}:59300"),
            collects_data: true,
            labels: HashMap::new(),
        },
        registered_at_ns: 0,
        last_heartbeat_ns: 0,
    }
}

pub(crate) fn program(target: &str) -> TracepointProgram {
    TracepointProgram {
        target: target.to_string(),
        source: "probe main".to_string(),
        outputs: vec![TracepointOutput {
            name: format!("{target}_events"),
            fields: vec!["latency".to_string()],
        }],
    }
}

/// Agent directory that replays scripted update batches.
#[derive(Default)]
pub(crate) struct FakeDirectory {
    pub agents: Mutex<Vec<Agent>>,
    pub data_info: Mutex<HashMap<AgentId, AgentDataInfo>>,
    batches: Mutex<VecDeque<StateResult<AgentUpdateBatch>>>,
    /// Cursor argument of every `agent_updates` call, in order.
    pub fetches: Mutex<Vec<Option<UpdateCursor>>>,
    pub fail_active_agents: Mutex<bool>,
}

impl FakeDirectory {
    pub fn with_agents(agents: Vec<Agent>) -> Self {
        Self {
            agents: Mutex::new(agents),
            ..Default::default()
        }
    }

    /// Queue the result of the next `agent_updates` call. Once the queue is
    /// drained every fetch returns an empty batch.
    pub fn push_batch(&self, batch: StateResult<AgentUpdateBatch>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn fetches(&self) -> Vec<Option<UpdateCursor>> {
        self.fetches.lock().unwrap().clone()
    }
}

impl AgentDirectory for FakeDirectory {
    fn active_agents(&self) -> StateResult<Vec<Agent>> {
        if *self.fail_active_agents.lock().unwrap() {
            return Err(StateError::Read("agent table unavailable".into()));
        }
        Ok(self.agents.lock().unwrap().clone())
    }

    fn agent_updates(&self, since: Option<UpdateCursor>) -> StateResult<AgentUpdateBatch> {
        self.fetches.lock().unwrap().push(since);
        self.batches.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(AgentUpdateBatch {
                cursor: since.unwrap_or_default(),
                ..Default::default()
            })
        })
    }

    fn agents_data_info(&self) -> StateResult<HashMap<AgentId, AgentDataInfo>> {
        Ok(self.data_info.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub(crate) struct FakeMetadata {
    pub schema: Mutex<ComputedSchema>,
}

impl MetadataStore for FakeMetadata {
    fn computed_schema(&self) -> StateResult<ComputedSchema> {
        Ok(self.schema.lock().unwrap().clone())
    }
}

/// In-memory tracepoint store with per-name registration failures.
#[derive(Default)]
pub(crate) struct FakeTracepoints {
    names: Mutex<HashMap<String, TracepointId>>,
    tracepoints: Mutex<Vec<Tracepoint>>,
    pub states: Mutex<HashMap<TracepointId, Vec<AgentTracepointStatus>>>,
    /// `(agents, tracepoint)` of every successful registration.
    pub registrations: Mutex<Vec<(Vec<AgentId>, TracepointId)>>,
    fail_registration: Mutex<HashSet<String>>,
}

impl FakeTracepoints {
    pub fn fail_registration_of(&self, name: &str) {
        self.fail_registration.lock().unwrap().insert(name.to_string());
    }

    pub fn registrations(&self) -> Vec<(Vec<AgentId>, TracepointId)> {
        self.registrations.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.names.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn set_states(&self, id: TracepointId, states: Vec<AgentTracepointStatus>) {
        self.states.lock().unwrap().insert(id, states);
    }
}

impl TracepointStore for FakeTracepoints {
    fn create_tracepoint(
        &self,
        name: &str,
        program: &TracepointProgram,
        ttl: Duration,
    ) -> StateResult<TracepointCreation> {
        let mut names = self.names.lock().unwrap();
        if let Some(id) = names.get(name) {
            return Ok(TracepointCreation::AlreadyExists(*id));
        }
        let id = Uuid::new_v4();
        names.insert(name.to_string(), id);
        self.tracepoints.lock().unwrap().push(Tracepoint {
            id,
            name: name.to_string(),
            program: program.clone(),
            ttl,
            expected_state: LifecycleState::Running,
            created_at_ns: 0,
            expires_at_ns: ttl.as_nanos() as i64,
        });
        Ok(TracepointCreation::Created(id))
    }

    fn register_tracepoint(
        &self,
        agent_ids: &[AgentId],
        id: TracepointId,
        _program: &TracepointProgram,
    ) -> StateResult<()> {
        let name = self
            .tracepoints
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.name.clone())
            .ok_or_else(|| StateError::not_found("tracepoint", id))?;
        if self.fail_registration.lock().unwrap().contains(&name) {
            return Err(StateError::Write(format!("cannot assign {name}")));
        }
        self.registrations
            .lock()
            .unwrap()
            .push((agent_ids.to_vec(), id));
        Ok(())
    }

    fn tracepoints_for_ids(&self, ids: &[TracepointId]) -> StateResult<Vec<Option<Tracepoint>>> {
        let tracepoints = self.tracepoints.lock().unwrap();
        Ok(ids
            .iter()
            .map(|id| tracepoints.iter().find(|t| t.id == *id).cloned())
            .collect())
    }

    fn all_tracepoints(&self) -> StateResult<Vec<Tracepoint>> {
        Ok(self.tracepoints.lock().unwrap().clone())
    }

    fn tracepoint_states(&self, id: TracepointId) -> StateResult<Vec<AgentTracepointStatus>> {
        Ok(self
            .states
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn remove_tracepoints(&self, names: &[String]) -> StateResult<()> {
        let mut index = self.names.lock().unwrap();
        if let Some(missing) = names.iter().find(|n| !index.contains_key(*n)) {
            return Err(StateError::not_found("tracepoint", missing));
        }
        for name in names {
            index.remove(name);
        }
        Ok(())
    }
}

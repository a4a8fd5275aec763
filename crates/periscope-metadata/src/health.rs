//! Agent health derived from heartbeat age.
//!
//! Health is never stored. Every read recomputes it from the agent's last
//! heartbeat and the evaluator's clock.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use periscope_state::{Agent, Clock};

/// Agents silent for longer than this are reported as unresponsive.
pub const UNHEALTHY_AGENT_THRESHOLD: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Healthy,
    Unresponsive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHealthStatus {
    pub state: AgentState,
    pub ns_since_last_heartbeat: i64,
}

/// Classify a heartbeat taken at `last_heartbeat_ns` as seen at `now_ns`.
///
/// Exactly at the threshold the agent is still healthy. A heartbeat in the
/// future (clock skew) counts as zero elapsed.
pub fn evaluate(last_heartbeat_ns: i64, now_ns: i64) -> AgentHealthStatus {
    let elapsed = now_ns.saturating_sub(last_heartbeat_ns).max(0);
    let state = if elapsed > UNHEALTHY_AGENT_THRESHOLD.as_nanos() as i64 {
        AgentState::Unresponsive
    } else {
        AgentState::Healthy
    };
    AgentHealthStatus {
        state,
        ns_since_last_heartbeat: elapsed,
    }
}

/// Evaluates agent health against an injected clock.
#[derive(Clone)]
pub struct HealthEvaluator {
    clock: Arc<dyn Clock>,
}

impl HealthEvaluator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn status(&self, agent: &Agent) -> AgentHealthStatus {
        evaluate(agent.last_heartbeat_ns, self.clock.now_ns())
    }
}

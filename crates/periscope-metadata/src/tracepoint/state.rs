//! Reduction of per-agent tracepoint states into one fleet-wide state.

use serde::{Deserialize, Serialize};

use periscope_state::{AgentTracepointStatus, DetailedStatus, LifecycleState};

/// Fleet-wide view of one tracepoint. Derived on read, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedState {
    pub state: LifecycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DetailedStatus>,
}

impl AggregatedState {
    fn of(state: LifecycleState) -> Self {
        Self {
            state,
            status: None,
        }
    }
}

/// Reduce agent states with precedence
/// terminated > running > pending > failed.
///
/// A failed result carries the status of the first failed agent. No reports
/// at all means the rollout has not started yet, so the result is pending.
pub fn aggregate(statuses: &[AgentTracepointStatus]) -> AggregatedState {
    if statuses.is_empty() {
        return AggregatedState::of(LifecycleState::Pending);
    }

    let has = |state: LifecycleState| statuses.iter().any(|s| s.state == state);

    if has(LifecycleState::Terminated) {
        return AggregatedState::of(LifecycleState::Terminated);
    }
    if has(LifecycleState::Running) {
        return AggregatedState::of(LifecycleState::Running);
    }
    if has(LifecycleState::Pending) {
        return AggregatedState::of(LifecycleState::Pending);
    }
    if let Some(failed) = statuses
        .iter()
        .find(|s| s.state == LifecycleState::Failed)
    {
        return AggregatedState {
            state: LifecycleState::Failed,
            status: failed.status.clone(),
        };
    }

    AggregatedState::of(LifecycleState::Unknown)
}

//! Tracepoint orchestration: fleet-wide state reduction and the
//! create/register/lookup/remove workflow.

pub mod coordinator;
pub mod state;

pub use coordinator::{TracepointCoordinator, TracepointInfo};
pub use state::{aggregate, AggregatedState};

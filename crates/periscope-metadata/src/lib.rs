//! Periscope metadata control plane.
//!
//! Answers fleet queries from the agent directory and metadata store,
//! streams agent deltas to query brokers, and coordinates tracepoint
//! rollout across agents.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────────┐
//!   RPC callers ──►│    MetadataServer    │
//!                  └──┬──────┬──────┬─────┘
//!                     │      │      │
//!          ┌──────────┘      │      └───────────┐
//!          ▼                 ▼                  ▼
//!   HealthEvaluator    UpdateStreamer   TracepointCoordinator
//!   schema::*               │                   │
//!          │                │                   │
//!          ▼                ▼                   ▼
//!    MetadataStore    AgentDirectory     TracepointStore
//! ```
//!
//! The collaborators are traits from `periscope-state`; the daemon wires
//! them to the redb-backed `StateStore` and the `AgentRegistry`.

pub mod duration;
pub mod error;
pub mod health;
pub mod messages;
pub mod schema;
pub mod server;
pub mod streamer;
pub mod tracepoint;

#[cfg(test)]
mod testing;

pub use duration::parse_duration;
pub use error::{MetadataError, MetadataResult};
pub use health::{AgentHealthStatus, AgentState, HealthEvaluator, UNHEALTHY_AGENT_THRESHOLD};
pub use server::{AgentUpdateStream, MetadataServer};
pub use streamer::{StreamParams, UpdateSink, UpdateStreamer};
pub use tracepoint::{AggregatedState, TracepointCoordinator, TracepointInfo};

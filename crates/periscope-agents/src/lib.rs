//! periscope-agents: the agent directory for Periscope.
//!
//! Tracks which collection agents are registered, when they last
//! heartbeated, which tables they expose, and which tracepoints they have
//! been assigned.
//!
//! # Architecture
//!
//! ```text
//! Agent
//!   ├── register()          → agent record + change log entry
//!   ├── heartbeat()         → refresh last-heartbeat timestamp
//!   ├── update_data_info()  → change log entry
//!   └── update_schemas()    → recompute fleet schema
//!
//! AgentRegistry
//!   ├── implements AgentDirectory for the metadata control plane
//!   ├── Reaps agents whose heartbeat is older than the expiry timeout
//!   ├── Compacts the agent change log on every reaper tick
//!   └── Persists everything to StateStore
//! ```

pub mod registry;

pub use registry::{AgentRegistry, DEFAULT_CHANGE_LOG_RETENTION};

//! periscope-state: embedded state store for Periscope.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for agents, agent schemas, the agent change log, and
//! tracepoints.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Agent mutations append to an ordered change log (`u64` keys) in the same
//! transaction, which lets each consumer read "changes since cursor C"
//! without any state shared between consumers.
//!
//! The collaborator traits in [`traits`] are what the metadata control plane
//! consumes; [`StateStore`] implements the schema and tracepoint contracts
//! directly, and the agent registry implements [`AgentDirectory`] on top of it.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod clock;
pub mod error;
pub mod store;
pub mod tables;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use traits::*;
pub use types::*;

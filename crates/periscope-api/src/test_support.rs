//! Fixtures for handler tests.

use std::sync::Arc;

use axum::response::Response;

use periscope_agents::AgentRegistry;
use periscope_metadata::MetadataServer;
use periscope_state::*;

use crate::ApiState;

/// API state over a fresh in-memory store.
pub(crate) fn test_state() -> (ApiState, StateStore) {
    let store = StateStore::open_in_memory().unwrap();
    let registry = Arc::new(AgentRegistry::new(store.clone()));
    let server = MetadataServer::new(
        registry.clone(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    );
    (ApiState { server, registry }, store)
}

pub(crate) async fn body_json(resp: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub(crate) fn sample_table(name: &str) -> TableSchema {
    TableSchema {
        name: name.into(),
        desc: String::new(),
        columns: vec![ColumnSchema {
            name: "time_".into(),
            data_type: DataType::Time64Ns,
            desc: String::new(),
            semantic_type: SemanticType::None,
        }],
    }
}

//! Control plane API tests.
//!
//! Drives the full router the daemon serves: agents register and report,
//! and the metadata endpoints reflect what they reported.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use periscope_agents::AgentRegistry;
use periscope_api::{ApiState, build_router};
use periscope_metadata::MetadataServer;
use periscope_state::StateStore;

fn router_for(store: StateStore) -> Router {
    let registry = Arc::new(AgentRegistry::new(store.clone()));
    let server = MetadataServer::new(registry.clone(), Arc::new(store.clone()), Arc::new(store));
    build_router(ApiState { server, registry })
}

fn test_router() -> Router {
    router_for(StateStore::open_in_memory().unwrap())
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            req = req.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };

    let resp = router.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn register_agent(router: &Router, hostname: &str) -> Uuid {
    let (status, body) = send(
        router,
        "POST",
        "/api/v1/agents",
        Some(json!({ "hostname": hostname, "address": "10.0.0.7:59300", "collects_data": true })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["id"].as_str().unwrap().parse().unwrap()
}

fn http_events_schema() -> Value {
    json!([{
        "name": "http_events",
        "desc": "HTTP requests",
        "columns": [
            { "name": "time_", "data_type": "time64_ns" },
            { "name": "upid", "data_type": "uint128", "semantic_type": "upid" },
            { "name": "latency", "data_type": "int64", "semantic_type": "duration_ns" }
        ]
    }])
}

#[tokio::test]
async fn healthz() {
    let router = test_router();
    let resp = router
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn agents_report_schemas_into_the_fleet_view() {
    let router = test_router();
    let a = register_agent(&router, "node-a").await;
    let b = register_agent(&router, "node-b").await;

    for id in [a, b] {
        let (status, _) = send(
            &router,
            "PUT",
            &format!("/api/v1/agents/{id}/schemas"),
            Some(http_events_schema()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&router, "GET", "/api/v1/schemas", None).await;
    assert_eq!(status, StatusCode::OK);
    let columns = &body["data"]["schema"]["relation_map"]["http_events"]["columns"];
    assert_eq!(columns.as_array().unwrap().len(), 3);
    assert_eq!(columns[2]["column_semantic_type"], "duration_ns");

    let (status, body) = send(&router, "GET", "/api/v1/agents/table-metadata", None).await;
    assert_eq!(status, StatusCode::OK);
    let agents = body["data"]["schema_info"][0]["agent_list"].as_array().unwrap();
    assert_eq!(agents.len(), 2);
}

#[tokio::test]
async fn agent_info_reports_health() {
    let router = test_router();
    let id = register_agent(&router, "node-a").await;

    let (status, _) = send(&router, "POST", &format!("/api/v1/agents/{id}/heartbeat"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, "GET", "/api/v1/agents", None).await;
    assert_eq!(status, StatusCode::OK);
    let info = &body["data"]["info"][0];
    assert_eq!(info["agent"]["info"]["hostname"], "node-a");
    assert_eq!(info["status"]["state"], "healthy");
}

#[tokio::test]
async fn heartbeat_for_unknown_agent_is_404() {
    let router = test_router();
    let (status, body) = send(
        &router,
        "POST",
        &format!("/api/v1/agents/{}/heartbeat", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn schema_by_agent_is_not_implemented() {
    let router = test_router();
    let (status, body) = send(&router, "GET", "/api/v1/schemas/by-agent", None).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn update_stream_requires_parameters() {
    let router = test_router();

    let (status, _) = send(&router, "GET", "/api/v1/agents/updates?max_update_interval=5s", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &router,
        "GET",
        "/api/v1/agents/updates?max_updates_per_response=10",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &router,
        "GET",
        "/api/v1/agents/updates?max_updates_per_response=10&max_update_interval=soon",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn tracepoint_rollout_end_to_end() {
    let router = test_router();
    let agent = register_agent(&router, "node-a").await;

    let request = json!({
        "requests": [{
            "name": "http_latency",
            "program": {
                "target": "/usr/sbin/nginx",
                "source": "uprobe:ngx_http_process_request",
                "outputs": [{ "name": "nginx_latency", "fields": ["latency"] }]
            },
            "ttl": "10m"
        }]
    });

    let (status, body) = send(&router, "POST", "/api/v1/tracepoints", Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let tracepoint = body["data"]["tracepoints"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["tracepoints"][0]["status"]["code"], "ok");

    // Same name again: reported, not re-created.
    let (status, body) = send(&router, "POST", "/api/v1/tracepoints", Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tracepoints"][0]["id"], tracepoint);
    assert_eq!(body["data"]["tracepoints"][0]["status"]["code"], "already_exists");

    let (_, body) = send(&router, "GET", &format!("/api/v1/agents/{agent}/tracepoints"), None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["status"]["state"], "pending");

    let (status, _) = send(
        &router,
        "PUT",
        &format!("/api/v1/agents/{agent}/tracepoints/{tracepoint}/status"),
        Some(json!({ "state": "running" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let missing = Uuid::new_v4();
    let (status, body) = send(
        &router,
        "GET",
        &format!("/api/v1/tracepoints?ids={tracepoint},{missing}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let infos = body["data"]["tracepoints"].as_array().unwrap();
    assert_eq!(infos[0]["state"], "running");
    assert_eq!(infos[0]["schema_names"][0], "nginx_latency");
    assert_eq!(infos[1]["id"], missing.to_string());
    assert_eq!(infos[1]["status"]["code"], "not_found");

    let (status, _) = send(
        &router,
        "DELETE",
        "/api/v1/tracepoints",
        Some(json!({ "names": ["http_latency"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Agents have not acknowledged the removal yet.
    let (_, body) = send(&router, "GET", "/api/v1/tracepoints", None).await;
    assert_eq!(body["data"]["tracepoints"][0]["expected_state"], "terminated");
    assert_eq!(body["data"]["tracepoints"][0]["state"], "running");

    let (status, _) = send(
        &router,
        "PUT",
        &format!("/api/v1/agents/{agent}/tracepoints/{tracepoint}/status"),
        Some(json!({ "state": "terminated" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&router, "GET", "/api/v1/tracepoints", None).await;
    assert_eq!(body["data"]["tracepoints"][0]["state"], "terminated");
}

#[tokio::test]
async fn removing_unknown_tracepoint_is_404() {
    let router = test_router();
    let (status, body) = send(
        &router,
        "DELETE",
        "/api/v1/tracepoints",
        Some(json!({ "names": ["ghost"] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("periscope.redb");

    let id = {
        let router = router_for(StateStore::open(&path).unwrap());
        let id = register_agent(&router, "node-a").await;
        send(
            &router,
            "PUT",
            &format!("/api/v1/agents/{id}/schemas"),
            Some(http_events_schema()),
        )
        .await;
        id
    };

    let router = router_for(StateStore::open(&path).unwrap());
    let (_, body) = send(&router, "GET", "/api/v1/agents/table-metadata", None).await;
    assert_eq!(body["data"]["schema_info"][0]["agent_list"][0], id.to_string());
}

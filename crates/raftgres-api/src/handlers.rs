//! Control-plane handlers.
//!
//! Membership goes through [`Membership`](raftgres_raft::Membership); the
//! table endpoint reads the local keyspace directly and so may lag the
//! leader.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use raftgres_raft::MembershipError;
use serde::Deserialize;
use tracing::{info, warn};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Membership ─────────────────────────────────────────────────

/// Query parameters of `/add-follower`.
#[derive(Debug, Deserialize)]
pub struct AddFollowerParams {
    pub id: String,
    pub addr: String,
}

/// GET|POST /add-follower?id=<name>&addr=<host:port>
pub async fn add_follower(
    State(state): State<ApiState>,
    Query(params): Query<AddFollowerParams>,
) -> impl IntoResponse {
    info!(id = %params.id, addr = %params.addr, "add-follower requested");
    match state.membership.add_voter(&params.id, &params.addr).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(MembershipError::NotLeader) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Not the leader" })),
        )
            .into_response(),
        Err(e) => {
            warn!(id = %params.id, error = %e, "add-follower failed");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

/// GET /leader
pub async fn leader(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.membership.leader_info())
}

/// GET /health
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    match state.membership.halted() {
        None => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))),
        Some(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "halted", "error": error })),
        ),
    }
}

// ── Diagnostics ────────────────────────────────────────────────

/// GET /tables/{name}
pub async fn get_table(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.executor.table_definition(&name) {
        Ok(Some(definition)) => ApiResponse::ok(definition).into_response(),
        Ok(None) => error_response("table not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use openraft::{BasicNode, ServerState};
    use raftgres_raft::{
        LogStore, Membership, NetworkFactory, NodeIdMap, RaftTiming, SqlRaft, StateMachine,
    };
    use raftgres_sql::Executor;
    use raftgres_store::Keyspace;
    use redb::Database;
    use redb::backends::InMemoryBackend;
    use tower::ServiceExt;

    use crate::build_router;

    struct TestNode {
        router: axum::Router,
        keyspace: Keyspace,
    }

    async fn test_node(lead: bool) -> TestNode {
        let db = Arc::new(
            Database::builder()
                .create_with_backend(InMemoryBackend::new())
                .unwrap(),
        );
        let node_map = Arc::new(NodeIdMap::new(Arc::clone(&db)).unwrap());
        let raft_id = node_map.resolve("node1").unwrap();
        let keyspace = Keyspace::open_in_memory().unwrap();
        let executor = Executor::new(keyspace.clone());

        let timing = RaftTiming {
            heartbeat_interval_ms: 50,
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
        };
        let raft = SqlRaft::new(
            raft_id,
            timing.to_config().unwrap(),
            NetworkFactory::new(),
            LogStore::new(db).unwrap(),
            StateMachine::new(executor.clone()),
        )
        .await
        .unwrap();
        let raft = Arc::new(raft);

        if lead {
            raft.initialize(BTreeMap::from([(raft_id, BasicNode::new("127.0.0.1:5001"))]))
                .await
                .unwrap();
            raft.wait(Some(Duration::from_secs(5)))
                .state(ServerState::Leader, "node1 leads")
                .await
                .unwrap();
        }

        let membership = Arc::new(Membership::new(raft, node_map, "node1").unwrap());
        TestNode {
            router: build_router(membership, executor),
            keyspace,
        }
    }

    async fn get(router: &axum::Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let resp = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn add_follower_on_non_leader_is_bad_request() {
        let node = test_node(false).await;
        let (status, body) = get(&node.router, "/add-follower?id=node2&addr=127.0.0.1:9").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "Not the leader" }));
    }

    #[tokio::test]
    async fn add_follower_requires_both_params() {
        let node = test_node(false).await;
        let (status, _) = get(&node.router, "/add-follower?id=node2").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn leader_reports_state() {
        let node = test_node(true).await;
        let (status, body) = get(&node.router, "/leader").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["node_id"], "node1");
        assert_eq!(json["is_leader"], true);
        assert_eq!(json["voters"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn health_is_ok_while_running() {
        let node = test_node(true).await;
        let (status, body) = get(&node.router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn table_lookup() {
        let node = test_node(false).await;
        let (status, _) = get(&node.router, "/tables/t").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        node.keyspace
            .put(
                "tables_t",
                br#"{"name":"t","column_names":["a"],"column_types":["pg_catalog.int4"]}"#,
            )
            .unwrap();
        let (status, body) = get(&node.router, "/tables/t").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"]["column_types"][0], "pg_catalog.int4");

        node.keyspace.put("tables_bad", b"nonsense").unwrap();
        let (status, _) = get(&node.router, "/tables/bad").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}

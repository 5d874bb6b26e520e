//! Raft RPC server: axum routes answering peers' consensus requests.
//!
//! Each route takes the JSON-encoded openraft request, hands it to the
//! local raft, and returns the openraft result as JSON. Raft-level errors
//! travel inside a 200 response so the caller can tell them apart from
//! transport failures.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use openraft::error::{InstallSnapshotError, RaftError};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use tracing::debug;

use crate::typ::{SqlRaft, TypeConfig};

/// Routes served on the consensus port.
pub fn raft_router(raft: Arc<SqlRaft>) -> Router {
    Router::new()
        .route("/raft/append", post(append_entries))
        .route("/raft/vote", post(vote))
        .route("/raft/snapshot", post(install_snapshot))
        .with_state(raft)
}

async fn append_entries(
    State(raft): State<Arc<SqlRaft>>,
    Json(req): Json<AppendEntriesRequest<TypeConfig>>,
) -> Json<Result<AppendEntriesResponse<u64>, RaftError<u64>>> {
    debug!(vote = ?req.vote, entries = req.entries.len(), "handling append_entries RPC");
    Json(raft.append_entries(req).await)
}

async fn vote(
    State(raft): State<Arc<SqlRaft>>,
    Json(req): Json<VoteRequest<u64>>,
) -> Json<Result<VoteResponse<u64>, RaftError<u64>>> {
    debug!(vote = ?req.vote, "handling vote RPC");
    Json(raft.vote(req).await)
}

async fn install_snapshot(
    State(raft): State<Arc<SqlRaft>>,
    Json(req): Json<InstallSnapshotRequest<TypeConfig>>,
) -> Json<Result<InstallSnapshotResponse<u64>, RaftError<u64, InstallSnapshotError>>> {
    debug!(vote = ?req.vote, "handling install_snapshot RPC");
    Json(raft.install_snapshot(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::single_node;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn vote_from_stale_term_is_answered() {
        let node = single_node("node1").await;
        let app = raft_router(Arc::clone(&node.raft));

        let req = VoteRequest::<u64> {
            vote: openraft::Vote::new(0, 2),
            last_log_id: None,
        };
        let resp = app
            .oneshot(post_json("/raft/vote", serde_json::to_string(&req).unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let result: Result<VoteResponse<u64>, RaftError<u64>> =
            serde_json::from_slice(&body).unwrap();
        // A leader in term >= 1 refuses a term-0 candidate.
        assert!(!result.unwrap().vote_granted);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let node = single_node("node1").await;
        let app = raft_router(Arc::clone(&node.raft));

        let resp = app
            .oneshot(post_json("/raft/append", "{not json".to_string()))
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }
}

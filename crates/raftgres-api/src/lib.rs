//! raftgres-api: HTTP control plane for a raftgres node.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET, POST | `/add-follower?id=..&addr=..` | Admit a voter (leader only) |
//! | GET | `/leader` | This node's view of leadership |
//! | GET | `/health` | 200 while consensus runs, 503 once halted |
//! | GET | `/tables/{name}` | Local, non-linearized read of a table definition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use raftgres_raft::Membership;
use raftgres_sql::Executor;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub membership: Arc<Membership>,
    pub executor: Executor,
}

/// Build the control-plane router.
pub fn build_router(membership: Arc<Membership>, executor: Executor) -> Router {
    let state = ApiState {
        membership,
        executor,
    };

    Router::new()
        .route(
            "/add-follower",
            get(handlers::add_follower).post(handlers::add_follower),
        )
        .route("/leader", get(handlers::leader))
        .route("/health", get(handlers::health))
        .route("/tables/{name}", get(handlers::get_table))
        .with_state(state)
}

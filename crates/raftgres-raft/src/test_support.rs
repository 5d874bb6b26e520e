//! In-process raft nodes for unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use openraft::{BasicNode, ServerState};
use raftgres_sql::Executor;
use raftgres_store::Keyspace;
use redb::Database;
use redb::backends::InMemoryBackend;

use crate::config::RaftTiming;
use crate::log_store::LogStore;
use crate::network::NetworkFactory;
use crate::node_map::NodeIdMap;
use crate::state_machine::StateMachine;
use crate::typ::SqlRaft;

pub(crate) struct TestNode {
    pub raft: Arc<SqlRaft>,
    pub raft_id: u64,
    pub keyspace: Keyspace,
    pub node_map: Arc<NodeIdMap>,
}

fn fast_timing() -> RaftTiming {
    RaftTiming {
        heartbeat_interval_ms: 50,
        election_timeout_min_ms: 150,
        election_timeout_max_ms: 300,
    }
}

/// A node that has not been initialized and so never becomes leader.
pub(crate) async fn fresh_node(name: &str) -> TestNode {
    let db = Arc::new(
        Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .unwrap(),
    );
    let node_map = Arc::new(NodeIdMap::new(Arc::clone(&db)).unwrap());
    let raft_id = node_map.resolve(name).unwrap();

    let keyspace = Keyspace::open_in_memory().unwrap();
    let raft = SqlRaft::new(
        raft_id,
        fast_timing().to_config().unwrap(),
        NetworkFactory::new(),
        LogStore::new(db).unwrap(),
        StateMachine::new(Executor::new(keyspace.clone())),
    )
    .await
    .unwrap();

    TestNode {
        raft: Arc::new(raft),
        raft_id,
        keyspace,
        node_map,
    }
}

/// A single-member cluster that has elected itself.
pub(crate) async fn single_node(name: &str) -> TestNode {
    let node = fresh_node(name).await;
    node.raft
        .initialize(BTreeMap::from([(
            node.raft_id,
            BasicNode::new("127.0.0.1:5001"),
        )]))
        .await
        .unwrap();
    node.raft
        .wait(Some(Duration::from_secs(5)))
        .state(ServerState::Leader, "single node elects itself")
        .await
        .unwrap();
    node
}

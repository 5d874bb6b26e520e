//! Restart behaviour: the keyspace is disposable, the log is not.
//!
//! A node is stopped, its keyspace wiped, and a new raft instance is
//! started over the same log. Replaying the log must rebuild exactly the
//! same keyspace contents.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use openraft::{BasicNode, ServerState};
use raftgres_raft::{LogStore, NetworkFactory, QueryIngress, RaftTiming, SqlRaft, StateMachine};
use raftgres_sql::Executor;
use raftgres_store::Keyspace;
use redb::Database;
use redb::backends::InMemoryBackend;

const RAFT_ID: u64 = 1;

fn log_db() -> Arc<Database> {
    Arc::new(
        Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .unwrap(),
    )
}

async fn start(log_db: &Arc<Database>, keyspace: &Keyspace) -> Arc<SqlRaft> {
    let timing = RaftTiming {
        heartbeat_interval_ms: 50,
        election_timeout_min_ms: 150,
        election_timeout_max_ms: 300,
    };
    let raft = SqlRaft::new(
        RAFT_ID,
        timing.to_config().unwrap(),
        NetworkFactory::new(),
        LogStore::new(Arc::clone(log_db)).unwrap(),
        StateMachine::new(Executor::new(keyspace.clone())),
    )
    .await
    .unwrap();
    Arc::new(raft)
}

#[tokio::test]
async fn wiped_keyspace_is_rebuilt_from_the_log() {
    let log_db = log_db();
    let keyspace = Keyspace::open_in_memory().unwrap();

    let raft = start(&log_db, &keyspace).await;
    raft.initialize(BTreeMap::from([(RAFT_ID, BasicNode::new("127.0.0.1:5001"))]))
        .await
        .unwrap();
    raft.wait(Some(Duration::from_secs(5)))
        .state(ServerState::Leader, "first start elects itself")
        .await
        .unwrap();

    let ingress = QueryIngress::new(Arc::clone(&raft));
    for sql in [
        "CREATE TABLE t (a INT, b TEXT)",
        "INSERT INTO t VALUES (1, 'x'), (2, 'y')",
        "CREATE TABLE u (c VARCHAR(10))",
        "INSERT INTO u VALUES ('z')",
        "SELECT a FROM t",
        "INSERT INTO t VALUES (3, 'w')",
    ] {
        ingress.submit(sql).await.unwrap();
    }

    let before = keyspace.dump().unwrap();
    let last_index = raft.metrics().borrow().last_applied.map(|l| l.index);
    assert_eq!(before.len(), 2 + 4);

    raft.shutdown().await.unwrap();
    drop(ingress);
    drop(raft);

    keyspace.wipe().unwrap();
    assert!(keyspace.is_empty().unwrap());

    let raft = start(&log_db, &keyspace).await;
    raft.wait(Some(Duration::from_secs(5)))
        .applied_index_at_least(last_index, "log replayed")
        .await
        .unwrap();

    assert_eq!(keyspace.dump().unwrap(), before);
    raft.shutdown().await.unwrap();
}

#[tokio::test]
async fn rejected_statements_leave_no_trace_after_replay() {
    let log_db = log_db();
    let keyspace = Keyspace::open_in_memory().unwrap();

    let raft = start(&log_db, &keyspace).await;
    raft.initialize(BTreeMap::from([(RAFT_ID, BasicNode::new("127.0.0.1:5001"))]))
        .await
        .unwrap();
    raft.wait(Some(Duration::from_secs(5)))
        .state(ServerState::Leader, "first start elects itself")
        .await
        .unwrap();

    let ingress = QueryIngress::new(Arc::clone(&raft));
    ingress.submit("CREATE TABLE t (a INT)").await.unwrap();
    assert!(ingress.submit("INSERT INTO t VALUES (1), (2.5)").await.is_err());
    assert!(ingress.submit("SELECT nope FROM t").await.is_err());
    ingress.submit("INSERT INTO t VALUES (7)").await.unwrap();

    let before = keyspace.dump().unwrap();
    let last_index = raft.metrics().borrow().last_applied.map(|l| l.index);
    raft.shutdown().await.unwrap();
    drop(ingress);
    drop(raft);

    keyspace.wipe().unwrap();
    let raft = start(&log_db, &keyspace).await;
    raft.wait(Some(Duration::from_secs(5)))
        .applied_index_at_least(last_index, "log replayed")
        .await
        .unwrap();

    assert_eq!(keyspace.dump().unwrap(), before);
    assert_eq!(before.len(), 2);
    raft.shutdown().await.unwrap();
}

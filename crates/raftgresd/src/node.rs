//! Node assembly: storage, raft, and the three listeners.
//!
//! Startup order matters. The keyspace is wiped before raft exists, so the
//! node cannot vote or answer queries until the log has been replayed into
//! an empty keyspace.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use openraft::BasicNode;
use raftgres_raft::{
    LogStore, Membership, NetworkFactory, NodeIdMap, QueryIngress, SqlRaft, StateMachine,
    raft_router,
};
use raftgres_sql::Executor;
use raftgres_store::Keyspace;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::NodeConfig;

/// A running node.
pub struct Node {
    raft: Arc<SqlRaft>,
    membership: Arc<Membership>,
    keyspace: Keyspace,
    http_addr: SocketAddr,
    raft_addr: SocketAddr,
    pg_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    pub async fn start(config: NodeConfig) -> anyhow::Result<Self> {
        info!(node_id = %config.node_id, "raftgres node starting");

        // ── Storage ──────────────────────────────────────────────────
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("create {}", config.data_dir.display()))?;
        std::fs::create_dir_all(config.snapshot_dir())
            .with_context(|| format!("create {}", config.snapshot_dir().display()))?;

        let keyspace_path = config.keyspace_path();
        let keyspace = Keyspace::open(&keyspace_path)?;
        keyspace.wipe()?;
        info!(path = ?keyspace_path, "keyspace opened and wiped");

        let log_store = LogStore::open(&config.log_path())?;
        let node_map = Arc::new(NodeIdMap::new(log_store.database())?);
        let raft_id = node_map.resolve(&config.node_id)?;
        info!(node_id = %config.node_id, raft_id, "node ID mapped");

        // ── Listeners ────────────────────────────────────────────────
        // Bound up front so the advertised raft address carries the real port.
        let raft_listener = bind(config.raft_port).await?;
        let http_listener = bind(config.http_port).await?;
        let pg_listener = bind(config.pg_port).await?;
        let raft_addr = raft_listener.local_addr()?;
        let http_addr = http_listener.local_addr()?;
        let pg_addr = pg_listener.local_addr()?;

        // ── Raft ─────────────────────────────────────────────────────
        let executor = Executor::new(keyspace.clone());
        let raft = SqlRaft::new(
            raft_id,
            config.timing.to_config()?,
            NetworkFactory::new(),
            log_store,
            StateMachine::new(executor.clone()),
        )
        .await?;
        let raft = Arc::new(raft);
        info!("raft instance created");

        let advertised = format!("{}:{}", config.raft_host, raft_addr.port());
        if config.join {
            info!(%advertised, "waiting to be added to a cluster");
        } else {
            let members = BTreeMap::from([(raft_id, BasicNode::new(&advertised))]);
            if let Err(e) = raft.initialize(members).await {
                // NotAllowed means already initialized, expected on restart.
                info!(error = %e, "raft initialize (may already be bootstrapped)");
            }
        }

        let membership = Arc::new(Membership::new(
            Arc::clone(&raft),
            node_map,
            &config.node_id,
        )?);

        // ── Servers ──────────────────────────────────────────────────
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        info!(%raft_addr, "raft RPC server starting");
        tasks.push(spawn_http(
            "raft RPC",
            raft_listener,
            raft_router(Arc::clone(&raft)),
            shutdown_rx.clone(),
        ));

        info!(%http_addr, "control plane starting");
        tasks.push(spawn_http(
            "control plane",
            http_listener,
            raftgres_api::build_router(Arc::clone(&membership), executor),
            shutdown_rx.clone(),
        ));

        let ingress = QueryIngress::new(Arc::clone(&raft));
        tasks.push(tokio::spawn(async move {
            if let Err(e) = raftgres_wire::serve(pg_listener, ingress, shutdown_rx).await {
                error!(error = %e, "query port error");
            }
        }));

        Ok(Self {
            raft,
            membership,
            keyspace,
            http_addr,
            raft_addr,
            pg_addr,
            shutdown_tx,
            tasks,
        })
    }

    pub fn raft(&self) -> &Arc<SqlRaft> {
        &self.raft
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn raft_addr(&self) -> SocketAddr {
        self.raft_addr
    }

    pub fn pg_addr(&self) -> SocketAddr {
        self.pg_addr
    }

    /// Resolves with the fatal error once the raft core has stopped.
    pub async fn halted(&self) -> String {
        let mut metrics = self.raft.metrics();
        loop {
            let fatal = metrics
                .borrow_and_update()
                .running_state
                .as_ref()
                .err()
                .map(|e| e.to_string());
            if let Some(fatal) = fatal {
                return fatal;
            }
            if metrics.changed().await.is_err() {
                return "raft metrics channel closed".to_string();
            }
        }
    }

    /// Stop serving and shut raft down.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        self.raft
            .shutdown()
            .await
            .map_err(|e| anyhow::anyhow!("raft shutdown: {e}"))?;
        info!("raftgres node stopped");
        Ok(())
    }
}

async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))
}

fn spawn_http(
    name: &'static str,
    listener: TcpListener,
    router: axum::Router,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        });
        if let Err(e) = server.await {
            error!(server = name, error = %e, "server error");
        }
    })
}

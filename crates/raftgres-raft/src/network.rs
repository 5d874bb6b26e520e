//! Raft network layer: JSON over HTTP.
//!
//! Implements `RaftNetworkFactory` and `RaftNetwork` on top of reqwest.
//! Every RPC is a POST of the JSON-encoded openraft request to the peer's
//! consensus port; the peer answers with a JSON `Result` (see
//! [`server`](crate::server)).

use std::time::Duration;

use openraft::BasicNode;
use openraft::error::{
    InstallSnapshotError, NetworkError, RPCError, RaftError, RemoteError, Unreachable,
};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::typ::TypeConfig;

/// Upper bound on a single RPC round trip.
const RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// Factory handing out per-peer connections that share one HTTP client.
#[derive(Clone, Default)]
pub struct NetworkFactory {
    client: reqwest::Client,
}

impl NetworkFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Connection to a single peer.
pub struct NetworkConnection {
    target: u64,
    addr: String,
    client: reqwest::Client,
}

impl NetworkConnection {
    fn url(&self, rpc: &str) -> String {
        format!("http://{}/raft/{rpc}", self.addr)
    }

    async fn send<Req, Resp, E>(
        &self,
        rpc: &str,
        req: &Req,
    ) -> Result<Resp, RPCError<u64, BasicNode, E>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
        E: std::error::Error + DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(rpc))
            .timeout(RPC_TIMEOUT)
            .json(req)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    debug!(target_node = self.target, addr = %self.addr, rpc, error = %e, "peer unreachable");
                    RPCError::Unreachable(Unreachable::new(&e))
                } else {
                    warn!(target_node = self.target, addr = %self.addr, rpc, error = %e, "raft rpc failed");
                    RPCError::Network(NetworkError::new(&e))
                }
            })?;

        let result: Result<Resp, E> = response
            .json()
            .await
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))?;

        result.map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
    }
}

impl RaftNetworkFactory<TypeConfig> for NetworkFactory {
    type Network = NetworkConnection;

    async fn new_client(&mut self, target: u64, node: &BasicNode) -> Self::Network {
        debug!(target, addr = %node.addr, "creating raft network connection");
        NetworkConnection {
            target,
            addr: node.addr.clone(),
            client: self.client.clone(),
        }
    }
}

impl RaftNetwork<TypeConfig> for NetworkConnection {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<u64>, RPCError<u64, BasicNode, RaftError<u64>>> {
        self.send("append", &rpc).await
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<u64>,
        RPCError<u64, BasicNode, RaftError<u64, InstallSnapshotError>>,
    > {
        self.send("snapshot", &rpc).await
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<u64>,
        _option: RPCOption,
    ) -> Result<VoteResponse<u64>, RPCError<u64, BasicNode, RaftError<u64>>> {
        self.send("vote", &rpc).await
    }
}

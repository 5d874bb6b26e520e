//! Cluster membership control and leadership queries.
//!
//! Only the leader admits voters. A new node is first added as a learner
//! and is promoted only once the leader has replicated to it. A candidate
//! that does not answer within the catch-up window is removed again, so
//! an unreachable address never leaves the cluster in a joint
//! configuration waiting on it. Nothing is retried.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use openraft::error::{ClientWriteError, RaftError};
use openraft::{BasicNode, ChangeMembers, ServerState};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::node_map::{NodeIdMap, NodeMapError};
use crate::typ::SqlRaft;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("Not the leader")]
    NotLeader,

    #[error("{0}")]
    AddVoter(String),

    #[error(transparent)]
    NodeId(#[from] NodeMapError),
}

fn add_voter_err(e: RaftError<u64, ClientWriteError<u64, BasicNode>>) -> MembershipError {
    match e {
        RaftError::APIError(ClientWriteError::ForwardToLeader(_)) => MembershipError::NotLeader,
        other => MembershipError::AddVoter(other.to_string()),
    }
}

/// This node's view of cluster leadership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderInfo {
    pub node_id: String,
    pub raft_id: u64,
    pub is_leader: bool,
    pub leader_id: Option<u64>,
    /// Consensus address of the leader, when the leader is a known member.
    pub leader_addr: Option<String>,
    pub voters: Vec<u64>,
}

/// Leader-side membership operations for the local node.
pub struct Membership {
    raft: Arc<SqlRaft>,
    node_map: Arc<NodeIdMap>,
    node_id: String,
    raft_id: u64,
}

impl Membership {
    pub fn new(
        raft: Arc<SqlRaft>,
        node_map: Arc<NodeIdMap>,
        node_id: &str,
    ) -> Result<Self, NodeMapError> {
        let raft_id = node_map.resolve(node_id)?;
        Ok(Self {
            raft,
            node_map,
            node_id: node_id.to_string(),
            raft_id,
        })
    }

    pub fn raft_id(&self) -> u64 {
        self.raft_id
    }

    /// Whether this node currently believes it is the leader.
    pub fn is_leader(&self) -> bool {
        self.raft.metrics().borrow().state == ServerState::Leader
    }

    pub fn leader_info(&self) -> LeaderInfo {
        let metrics = self.raft.metrics().borrow().clone();
        let membership = metrics.membership_config.membership();
        let leader_addr = metrics
            .current_leader
            .and_then(|id| membership.get_node(&id))
            .map(|node| node.addr.clone());

        LeaderInfo {
            node_id: self.node_id.clone(),
            raft_id: self.raft_id,
            is_leader: metrics.state == ServerState::Leader,
            leader_id: metrics.current_leader,
            leader_addr,
            voters: membership.voter_ids().collect(),
        }
    }

    /// The fatal error that stopped the raft core, if it has stopped.
    pub fn halted(&self) -> Option<String> {
        match &self.raft.metrics().borrow().running_state {
            Ok(()) => None,
            Err(fatal) => Some(fatal.to_string()),
        }
    }

    /// How long a new learner has to acknowledge replication before it is
    /// given up on.
    fn catch_up_window(&self) -> Duration {
        Duration::from_millis(self.raft.config().election_timeout_max * 2)
    }

    /// Admit the node named `node_id`, reachable for consensus at `addr`,
    /// as a voter. Returns its raft id.
    ///
    /// The voting set changes only if the candidate acknowledged
    /// replication as a learner first.
    pub async fn add_voter(&self, node_id: &str, addr: &str) -> Result<u64, MembershipError> {
        if !self.is_leader() {
            return Err(MembershipError::NotLeader);
        }

        let raft_id = self.node_map.resolve(node_id)?;
        info!(node_id, raft_id, addr, "adding voter");

        self.raft
            .add_learner(raft_id, BasicNode::new(addr), false)
            .await
            .map_err(|e| {
                warn!(node_id, addr, error = %e, "add learner failed");
                add_voter_err(e)
            })?;

        let window = self.catch_up_window();
        let caught_up = self
            .raft
            .wait(Some(window))
            .metrics(
                |m| {
                    m.replication
                        .as_ref()
                        .and_then(|r| r.get(&raft_id))
                        .is_some_and(|matched| matched.is_some())
                },
                "learner acknowledged replication",
            )
            .await;
        if let Err(e) = caught_up {
            warn!(node_id, addr, error = %e, "learner did not catch up, removing it");
            self.remove_learner(raft_id).await;
            return Err(MembershipError::AddVoter(format!(
                "node {node_id} at {addr} did not respond within {}ms",
                window.as_millis()
            )));
        }

        self.raft
            .change_membership(ChangeMembers::AddVoterIds(BTreeSet::from([raft_id])), false)
            .await
            .map_err(|e| {
                warn!(node_id, addr, error = %e, "promote to voter failed");
                add_voter_err(e)
            })?;

        info!(node_id, raft_id, "voter added");
        Ok(raft_id)
    }

    async fn remove_learner(&self, raft_id: u64) {
        if let Err(e) = self
            .raft
            .change_membership(ChangeMembers::RemoveNodes(BTreeSet::from([raft_id])), false)
            .await
        {
            warn!(raft_id, error = %e, "could not remove learner");
        }
    }
}

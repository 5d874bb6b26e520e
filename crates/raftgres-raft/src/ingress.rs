//! Statement submission: the path from a client front-end into the log.
//!
//! Text is parsed locally first so that nothing unparseable is ever
//! committed (a committed entry that fails to parse halts every replica).
//! The verbatim text is then appended through the local raft and the call
//! waits for the entry to be applied. Non-leaders refuse; writes are not
//! forwarded.

use std::sync::Arc;

use openraft::error::{ClientWriteError, RaftError};
use raftgres_sql::{Outcome, ParseError, QueryError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::typ::{Request, SqlRaft};

#[derive(Debug, Error)]
pub enum IngressError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("not the leader (leader: {})", leader_addr.as_deref().unwrap_or("unknown"))]
    NotLeader {
        leader_id: Option<u64>,
        leader_addr: Option<String>,
    },

    #[error("consensus failure: {0}")]
    Consensus(String),
}

/// Submits statements to the replicated log.
#[derive(Clone)]
pub struct QueryIngress {
    raft: Arc<SqlRaft>,
}

impl QueryIngress {
    pub fn new(raft: Arc<SqlRaft>) -> Self {
        Self { raft }
    }

    /// Commit `text` and return the outcome of applying it.
    pub async fn submit(&self, text: &str) -> Result<Outcome, IngressError> {
        let stmt = raftgres_sql::parse(text)?;
        debug!(kind = stmt.kind(), "submitting statement");

        match self.raft.client_write(Request::new(text)).await {
            Ok(resp) => {
                debug!(index = resp.log_id.index, "statement committed");
                Ok(resp.data.outcome?)
            }
            Err(RaftError::APIError(ClientWriteError::ForwardToLeader(fwd))) => {
                Err(IngressError::NotLeader {
                    leader_id: fwd.leader_id,
                    leader_addr: fwd.leader_node.map(|node| node.addr),
                })
            }
            Err(e) => {
                warn!(error = %e, "client write failed");
                Err(IngressError::Consensus(e.to_string()))
            }
        }
    }
}

//! Raft type configuration for raftgres.
//!
//! A log entry carries nothing but the statement text as the client sent
//! it. Parsing happens again on every replica at apply time.

use std::io::Cursor;

use openraft::TokioRuntime;
use raftgres_sql::{Outcome, QueryError};

/// Client write submitted to the cluster: one SQL statement, verbatim.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Request {
    pub statement: String,
}

impl Request {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
        }
    }
}

/// Result of applying one entry, handed back to the submitter.
///
/// Only deterministic query errors travel here. Faults stop the node
/// instead of producing a response.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Response {
    pub outcome: Result<Outcome, QueryError>,
}

impl Response {
    /// Response for entries that carry no statement (blank, membership).
    pub fn noop() -> Self {
        Self {
            outcome: Ok(Outcome::Ignored {
                kind: String::new(),
            }),
        }
    }
}

openraft::declare_raft_types!(
    /// raftgres Raft type configuration.
    pub TypeConfig:
        D = Request,
        R = Response,
        NodeId = u64,
        Node = openraft::BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = TokioRuntime,
);

/// Convenience alias for the Raft instance.
pub type SqlRaft = openraft::Raft<TypeConfig>;

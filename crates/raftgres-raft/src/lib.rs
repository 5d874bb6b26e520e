// openraft's StorageError is large; every storage trait returns it.
#![allow(clippy::result_large_err)]

//! raftgres consensus: openraft over a redb log, applying SQL statements.
//!
//! Every node runs one openraft instance. Clients submit statement text,
//! the leader appends it to the replicated log, and once committed each
//! replica's state machine parses and executes it against its own
//! keyspace.
//!
//! # Architecture
//!
//! - **`typ`**: Type configuration (`TypeConfig`, `Request`, `Response`)
//! - **`log_store`**: Raft log, vote and commit index in redb
//! - **`state_machine`**: Applies committed statements through the executor
//! - **`network`** / **`server`**: JSON-over-HTTP transport between peers
//! - **`node_map`**: Operator node names to raft ids
//! - **`membership`**: Leader-only voter admission
//! - **`ingress`**: Statement submission path for client front-ends

pub mod config;
pub mod ingress;
pub mod log_store;
pub mod membership;
pub mod network;
pub mod node_map;
pub mod server;
pub mod state_machine;
pub mod typ;

#[cfg(test)]
mod test_support;

pub use config::RaftTiming;
pub use ingress::{IngressError, QueryIngress};
pub use log_store::LogStore;
pub use membership::{LeaderInfo, Membership, MembershipError};
pub use network::{NetworkConnection, NetworkFactory};
pub use node_map::{NodeIdMap, NodeMapError};
pub use server::raft_router;
pub use state_machine::{ApplyFault, StateMachine};
pub use typ::{Request, Response, SqlRaft, TypeConfig};

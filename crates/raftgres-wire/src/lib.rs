//! raftgres-wire: the query port.
//!
//! Speaks enough of the PostgreSQL frontend/backend protocol (version 3.0,
//! simple query only) for `psql` and ordinary drivers to connect, send a
//! statement and read back rows. Statements go through
//! [`QueryIngress`](raftgres_raft::QueryIngress), so only the leader
//! accepts them.

pub mod codec;
pub mod server;

pub use codec::{BackendMessage, FrontendMessage, WireError};
pub use server::{Session, serve};

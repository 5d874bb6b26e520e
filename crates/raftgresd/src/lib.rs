//! raftgresd: a raftgres node as a library, so tests can run whole nodes
//! in-process.

pub mod config;
pub mod node;

pub use config::{Cli, NodeConfig};
pub use node::Node;

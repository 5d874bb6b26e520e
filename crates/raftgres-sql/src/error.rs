//! Error types for parsing and executing statements.
//!
//! Two families matter to callers:
//!
//! - [`QueryError`] is deterministic: every replica computes the same one
//!   for the same statement and keyspace, and nothing was written. It is
//!   safe to hand back to the client.
//! - [`ExecError::Store`] and [`ExecError::Corrupt`] are local faults. The
//!   replica can no longer prove it reproduces the agreed state.

use raftgres_store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Statement text could not be turned into a [`Statement`](crate::Statement).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("expected a single statement, got {0}")]
    MultipleStatements(usize),
}

/// A statement that is well-formed SQL but cannot be executed here.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum QueryError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("unknown value type: {0}")]
    UnsupportedValue(String),

    #[error("unsupported statement: {0}")]
    Unsupported(String),
}

/// Anything that can go wrong while executing a statement.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("keyspace failure: {0}")]
    Store(#[from] StoreError),

    #[error("corrupt value under {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("could not encode value for {key}: {reason}")]
    Encode { key: String, reason: String },
}

impl ExecError {
    /// Whether the error leaves the replica unable to continue applying.
    pub fn is_fault(&self) -> bool {
        !matches!(self, ExecError::Query(_))
    }
}

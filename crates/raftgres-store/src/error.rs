//! Error types for the keyspace store.

use thiserror::Error;

/// Result type alias for keyspace operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during keyspace operations.
///
/// Variants name the phase that failed; the payload is the underlying
/// redb message.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),
}

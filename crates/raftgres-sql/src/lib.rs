//! raftgres-sql: the SQL-to-keyspace execution layer.
//!
//! Statement text is parsed with [`sqlparser`] (PostgreSQL dialect) and
//! reduced to a closed [`Statement`] enum; the [`Executor`] maps each kind
//! onto keyspace operations:
//!
//! - **CREATE** stores a [`TableDefinition`] under `tables_{name}`.
//! - **INSERT** stores each tuple under `rows_{table}_{id}`.
//! - **DELETE** removes every row of every table.
//! - **SELECT** scans `rows_{table}_` and projects columns by name.
//!
//! Everything here must be deterministic: the same statement at the same
//! log position must produce the same bytes on every replica.

pub mod error;
pub mod executor;
pub mod schema;
pub mod statement;

pub use error::{ExecError, ParseError, QueryError};
pub use executor::{Executor, Outcome, QueryResult};
pub use schema::{TableDefinition, Value};
pub use statement::{Statement, parse};

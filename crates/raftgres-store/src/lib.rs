//! raftgres-store: the local keyspace every replica applies the log to.
//!
//! Backed by [redb](https://docs.rs/redb). The keyspace is a single ordered
//! table of opaque string keys to opaque byte values. Callers build their
//! own key namespaces on top of it (the SQL layer uses `tables_*` and
//! `rows_*`) and rely on prefix scans to enumerate a namespace.
//!
//! The `Keyspace` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! so diagnostic readers can run alongside the state machine.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StoreError, StoreResult};
pub use store::Keyspace;

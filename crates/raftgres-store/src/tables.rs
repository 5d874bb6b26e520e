//! redb table definitions for the keyspace.

use redb::TableDefinition;

/// The whole keyspace: opaque string key to opaque byte value.
pub const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

//! Keyspace: redb-backed key/value persistence for one replica.
//!
//! Provides point reads and writes, an atomic batch write, ordered prefix
//! scans and a destructive wipe. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::KV;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Thread-safe keyspace backed by redb.
#[derive(Clone)]
pub struct Keyspace {
    db: Arc<Database>,
}

impl Keyspace {
    /// Open (or create) a persistent keyspace at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "keyspace opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory keyspace (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory keyspace opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(KV).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Read the value stored under `key`.
    pub fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(guard.value().to_vec())),
            None => Ok(None),
        }
    }

    /// Write `value` under `key`, replacing any previous value.
    pub fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            table.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, len = value.len(), "key stored");
        Ok(())
    }

    /// Write every pair in a single transaction: either all land or none do.
    pub fn put_batch(&self, entries: &[(String, Vec<u8>)]) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            for (key, value) in entries {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = entries.len(), "batch stored");
        Ok(())
    }

    /// Every key/value pair whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let key = key.value();
            // Keys sharing the prefix are contiguous; the first miss ends the run.
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_string(), value.value().to_vec()));
        }
        Ok(results)
    }

    /// Remove every key starting with `prefix`. Returns number removed.
    pub fn delete_prefix(&self, prefix: &str) -> StoreResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            let keys: Vec<String> = table
                .range(prefix..)
                .map_err(map_err!(Read))?
                .map(|entry| entry.map(|(k, _)| k.value().to_string()))
                .take_while(|key| match key {
                    Ok(k) => k.starts_with(prefix),
                    Err(_) => true,
                })
                .collect::<Result<_, _>>()
                .map_err(map_err!(Read))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            count = keys.len() as u64;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%prefix, count, "prefix deleted");
        Ok(count)
    }

    /// Remove every entry in the keyspace.
    pub fn wipe(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.delete_table(KV).map_err(map_err!(Table))?;
        txn.open_table(KV).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!("keyspace wiped");
        Ok(())
    }

    /// Every entry in key order. Used to compare replicas.
    pub fn dump(&self) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.scan_prefix("")
    }

    /// Number of entries in the keyspace.
    pub fn len(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV).map_err(map_err!(Table))?;
        table.len().map_err(map_err!(Read))
    }

    /// Whether the keyspace holds no entries.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> Keyspace {
        let store = Keyspace::open_in_memory().unwrap();
        store.put("tables_users", b"{}").unwrap();
        store.put("rows_users_b", b"[2]").unwrap();
        store.put("rows_users_a", b"[1]").unwrap();
        store.put("rows_orders_a", b"[3]").unwrap();
        store
    }

    #[test]
    fn put_and_get() {
        let store = Keyspace::open_in_memory().unwrap();
        store.put("k", b"v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn put_overwrites() {
        let store = Keyspace::open_in_memory().unwrap();
        store.put("k", b"one").unwrap();
        store.put("k", b"two").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn scan_prefix_is_ordered_and_bounded() {
        let store = populated();
        let rows = store.scan_prefix("rows_users_").unwrap();
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["rows_users_a", "rows_users_b"]);
        assert_eq!(rows[0].1, b"[1]".to_vec());
    }

    #[test]
    fn scan_prefix_without_matches_is_empty() {
        let store = populated();
        assert!(store.scan_prefix("rows_nothing_").unwrap().is_empty());
        assert!(store.scan_prefix("zzz").unwrap().is_empty());
    }

    #[test]
    fn batch_writes_all_entries() {
        let store = Keyspace::open_in_memory().unwrap();
        let batch = vec![
            ("a".to_string(), b"1".to_vec()),
            ("b".to_string(), b"2".to_vec()),
        ];
        store.put_batch(&batch).unwrap();
        assert_eq!(store.dump().unwrap(), batch);
    }

    #[test]
    fn delete_prefix_leaves_other_namespaces() {
        let store = populated();
        let removed = store.delete_prefix("rows_").unwrap();
        assert_eq!(removed, 3);
        let keys: Vec<String> = store.dump().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["tables_users".to_string()]);
        assert_eq!(store.delete_prefix("rows_").unwrap(), 0);
    }

    #[test]
    fn wipe_empties_store() {
        let store = populated();
        assert!(!store.is_empty().unwrap());
        store.wipe().unwrap();
        assert!(store.is_empty().unwrap());
        // Still usable afterwards.
        store.put("k", b"v").unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn clones_share_state() {
        let store = Keyspace::open_in_memory().unwrap();
        let other = store.clone();
        store.put("k", b"v").unwrap();
        assert_eq!(other.get("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.redb");

        {
            let store = Keyspace::open(&path).unwrap();
            store.put("tables_t", b"{}").unwrap();
        }

        let store = Keyspace::open(&path).unwrap();
        assert_eq!(store.get("tables_t").unwrap(), Some(b"{}".to_vec()));
    }
}

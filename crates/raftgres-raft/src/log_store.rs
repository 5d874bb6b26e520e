//! Raft log storage backed by redb.
//!
//! The log, the vote and the commit index live in a redb database of
//! their own, separate from the keyspace. The keyspace is wiped on every
//! start while this database survives, so the log is the only durable
//! record of what the node has agreed to.

use std::fmt::Debug;
use std::ops::RangeBounds;
use std::path::Path;
use std::sync::Arc;

use openraft::storage::{LogFlushed, LogState, RaftLogReader, RaftLogStorage};
use openraft::{Entry, ErrorSubject, ErrorVerb, LogId, StorageError, Vote};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::typ::TypeConfig;

/// Log entries: key = log index, value = JSON entry.
const LOG_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("raft_log");

/// Vote, commit index and purge marker: key = name, value = JSON.
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("raft_meta");

const VOTE_KEY: &str = "vote";
const COMMITTED_KEY: &str = "committed";
const LAST_PURGED_KEY: &str = "last_purged";

fn read_err(e: impl std::fmt::Display) -> StorageError<u64> {
    StorageError::from_io_error(
        ErrorSubject::Store,
        ErrorVerb::Read,
        std::io::Error::other(e.to_string()),
    )
}

fn write_err(e: impl std::fmt::Display) -> StorageError<u64> {
    StorageError::from_io_error(
        ErrorSubject::Store,
        ErrorVerb::Write,
        std::io::Error::other(e.to_string()),
    )
}

/// Raft log storage. Cheap to clone; clones share the database.
#[derive(Clone)]
pub struct LogStore {
    db: Arc<Database>,
}

/// Read-only view handed to openraft's replication tasks.
pub struct LogReader {
    db: Arc<Database>,
}

impl LogStore {
    /// Open (or create) the log database at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError<u64>> {
        let db = Database::create(path).map_err(write_err)?;
        info!(path = %path.display(), "raft log opened");
        Self::new(Arc::new(db))
    }

    /// Use an already opened database, creating the tables if needed.
    pub fn new(db: Arc<Database>) -> Result<Self, StorageError<u64>> {
        let txn = db.begin_write().map_err(write_err)?;
        txn.open_table(LOG_TABLE).map_err(write_err)?;
        txn.open_table(META_TABLE).map_err(write_err)?;
        txn.commit().map_err(write_err)?;
        Ok(Self { db })
    }

    /// The underlying database, shared with the node-id map.
    pub fn database(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    fn write_meta<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError<u64>> {
        let data = serde_json::to_vec(value).map_err(write_err)?;
        let txn = self.db.begin_write().map_err(write_err)?;
        {
            let mut table = txn.open_table(META_TABLE).map_err(write_err)?;
            table.insert(key, data.as_slice()).map_err(write_err)?;
        }
        txn.commit().map_err(write_err)
    }

    fn read_meta<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError<u64>> {
        let txn = self.db.begin_read().map_err(read_err)?;
        let table = txn.open_table(META_TABLE).map_err(read_err)?;
        match table.get(key).map_err(read_err)? {
            Some(val) => Ok(Some(serde_json::from_slice(val.value()).map_err(read_err)?)),
            None => Ok(None),
        }
    }
}

/// Remove every log entry whose index falls in `range`.
fn remove_entries(
    txn: &WriteTransaction,
    range: impl RangeBounds<u64>,
) -> Result<usize, StorageError<u64>> {
    let mut table = txn.open_table(LOG_TABLE).map_err(write_err)?;
    let keys: Vec<u64> = table
        .range(range)
        .map_err(write_err)?
        .map(|item| item.map(|(k, _)| k.value()))
        .collect::<Result<_, _>>()
        .map_err(write_err)?;
    for key in &keys {
        table.remove(*key).map_err(write_err)?;
    }
    Ok(keys.len())
}

impl RaftLogReader<TypeConfig> for LogReader {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + Send>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<u64>> {
        let txn = self.db.begin_read().map_err(read_err)?;
        let table = txn.open_table(LOG_TABLE).map_err(read_err)?;

        let mut entries = Vec::new();
        for item in table.range(range).map_err(read_err)? {
            let (_, val) = item.map_err(read_err)?;
            entries.push(serde_json::from_slice(val.value()).map_err(read_err)?);
        }
        Ok(entries)
    }
}

impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + Send>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<u64>> {
        let mut reader = self.get_log_reader().await;
        reader.try_get_log_entries(range).await
    }
}

impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = LogReader;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<u64>> {
        let last_log_id = {
            let txn = self.db.begin_read().map_err(read_err)?;
            let table = txn.open_table(LOG_TABLE).map_err(read_err)?;
            match table.last().map_err(read_err)? {
                Some((_, val)) => {
                    let entry: Entry<TypeConfig> =
                        serde_json::from_slice(val.value()).map_err(read_err)?;
                    Some(entry.log_id)
                }
                None => None,
            }
        };
        let last_purged_log_id: Option<LogId<u64>> = self.read_meta(LAST_PURGED_KEY)?;

        Ok(LogState {
            last_purged_log_id,
            // With every entry purged, the purge marker is the last log id.
            last_log_id: last_log_id.or(last_purged_log_id),
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        LogReader {
            db: Arc::clone(&self.db),
        }
    }

    async fn save_vote(&mut self, vote: &Vote<u64>) -> Result<(), StorageError<u64>> {
        self.write_meta(VOTE_KEY, vote)?;
        debug!(?vote, "saved vote");
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<u64>>, StorageError<u64>> {
        self.read_meta(VOTE_KEY)
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId<u64>>,
    ) -> Result<(), StorageError<u64>> {
        match committed {
            Some(log_id) => self.write_meta(COMMITTED_KEY, &log_id),
            None => Ok(()),
        }
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<u64>>, StorageError<u64>> {
        self.read_meta(COMMITTED_KEY)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<u64>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
        I::IntoIter: Send,
    {
        let txn = self.db.begin_write().map_err(write_err)?;
        {
            let mut table = txn.open_table(LOG_TABLE).map_err(write_err)?;
            for entry in entries {
                let data = serde_json::to_vec(&entry).map_err(write_err)?;
                table
                    .insert(entry.log_id.index, data.as_slice())
                    .map_err(write_err)?;
            }
        }
        txn.commit().map_err(write_err)?;

        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<u64>) -> Result<(), StorageError<u64>> {
        let txn = self.db.begin_write().map_err(write_err)?;
        let removed = remove_entries(&txn, log_id.index..)?;
        txn.commit().map_err(write_err)?;
        debug!(index = log_id.index, removed, "truncated log");
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<u64>) -> Result<(), StorageError<u64>> {
        let marker = serde_json::to_vec(&log_id).map_err(write_err)?;
        let txn = self.db.begin_write().map_err(write_err)?;
        {
            let mut meta = txn.open_table(META_TABLE).map_err(write_err)?;
            meta.insert(LAST_PURGED_KEY, marker.as_slice())
                .map_err(write_err)?;
        }
        let removed = remove_entries(&txn, ..=log_id.index)?;
        txn.commit().map_err(write_err)?;
        debug!(index = log_id.index, removed, "purged log");
        Ok(())
    }
}

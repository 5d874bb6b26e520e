//! Mapping between operator node names and u64 raft ids.
//!
//! Operators name nodes with strings (`--node-id node1`) while openraft
//! wants integers. The raft id is an FNV-1a hash of the name, so every
//! node derives the same id for the same name without coordination.
//! Names seen so far are cached and persisted next to the raft log.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use thiserror::Error;
use tracing::debug;

/// raft id → node name.
const ID_TABLE: TableDefinition<u64, &str> = TableDefinition::new("raft_node_map");

#[derive(Debug, Error)]
pub enum NodeMapError {
    /// Two names hash to the same id. Shifting one of them would give
    /// nodes different ids for the same name, so it is refused.
    #[error("node name {name:?} collides with {existing:?} on raft id {raft_id}")]
    Collision {
        name: String,
        existing: String,
        raft_id: u64,
    },

    #[error("node map storage: {0}")]
    Storage(String),
}

fn storage_err(e: impl std::fmt::Display) -> NodeMapError {
    NodeMapError::Storage(e.to_string())
}

/// Bidirectional map between node names and raft ids.
pub struct NodeIdMap {
    db: Arc<Database>,
    forward: RwLock<HashMap<String, u64>>,
    reverse: RwLock<HashMap<u64, String>>,
}

impl NodeIdMap {
    /// Open the map stored in `db`, loading every known mapping.
    pub fn new(db: Arc<Database>) -> Result<Self, NodeMapError> {
        let txn = db.begin_write().map_err(storage_err)?;
        txn.open_table(ID_TABLE).map_err(storage_err)?;
        txn.commit().map_err(storage_err)?;

        let mut forward = HashMap::new();
        let mut reverse = HashMap::new();
        {
            let txn = db.begin_read().map_err(storage_err)?;
            let table = txn.open_table(ID_TABLE).map_err(storage_err)?;
            for item in table.iter().map_err(storage_err)? {
                let (k, v) = item.map_err(storage_err)?;
                forward.insert(v.value().to_string(), k.value());
                reverse.insert(k.value(), v.value().to_string());
            }
        }

        Ok(Self {
            db,
            forward: RwLock::new(forward),
            reverse: RwLock::new(reverse),
        })
    }

    /// Raft id for `name`, recording the mapping if it is new.
    pub fn resolve(&self, name: &str) -> Result<u64, NodeMapError> {
        if let Some(id) = self.raft_id(name) {
            return Ok(id);
        }

        let raft_id = raft_id_for(name);
        if let Some(existing) = self.node_name(raft_id) {
            return Err(NodeMapError::Collision {
                name: name.to_string(),
                existing,
                raft_id,
            });
        }

        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(ID_TABLE).map_err(storage_err)?;
            table.insert(raft_id, name).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;

        self.forward
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), raft_id);
        self.reverse
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(raft_id, name.to_string());

        debug!(name, raft_id, "mapped node name");
        Ok(raft_id)
    }

    /// Raft id previously recorded for `name`.
    pub fn raft_id(&self, name: &str) -> Option<u64> {
        self.forward
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    /// Name previously recorded for `raft_id`.
    pub fn node_name(&self, raft_id: u64) -> Option<String> {
        self.reverse
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&raft_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.forward
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// FNV-1a 64-bit hash of the name, never zero.
pub fn raft_id_for(name: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in name.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash.max(1)
}

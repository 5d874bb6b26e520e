//! Raft timing and the openraft `Config` built from it.

use std::sync::Arc;

use openraft::{Config, ConfigError, SnapshotPolicy};
use serde::{Deserialize, Serialize};

/// Heartbeat and election timing, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftTiming {
    pub heartbeat_interval_ms: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
}

impl Default for RaftTiming {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 500,
            election_timeout_min_ms: 1500,
            election_timeout_max_ms: 3000,
        }
    }
}

impl RaftTiming {
    /// Validated openraft config. Snapshots are never taken.
    pub fn to_config(&self) -> Result<Arc<Config>, ConfigError> {
        let config = Config {
            cluster_name: "raftgres".to_string(),
            heartbeat_interval: self.heartbeat_interval_ms,
            election_timeout_min: self.election_timeout_min_ms,
            election_timeout_max: self.election_timeout_max_ms,
            snapshot_policy: SnapshotPolicy::Never,
            ..Default::default()
        };
        Ok(Arc::new(config.validate()?))
    }
}

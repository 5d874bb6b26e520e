//! Command-line flags and the optional TOML tuning file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use raftgres_raft::RaftTiming;
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(name = "raftgresd", about = "raftgres replicated SQL node")]
pub struct Cli {
    /// Stable name of this node; its raft id is derived from it.
    #[arg(long)]
    pub node_id: String,

    /// Control-plane HTTP port.
    #[arg(long)]
    pub http_port: u16,

    /// Raft RPC port.
    #[arg(long)]
    pub raft_port: u16,

    /// PostgreSQL query port.
    #[arg(long)]
    pub pg_port: u16,

    /// Directory holding the keyspace and raft log.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Host other nodes use to reach this node's raft port.
    #[arg(long, default_value = "localhost")]
    pub raft_host: String,

    /// Start without bootstrapping a cluster and wait to be added.
    #[arg(long)]
    pub join: bool,

    /// TOML file with raft timing overrides.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    raft: RaftTiming,
}

/// Everything a node needs to start.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub http_port: u16,
    pub raft_port: u16,
    pub pg_port: u16,
    pub data_dir: PathBuf,
    pub raft_host: String,
    pub join: bool,
    pub timing: RaftTiming,
}

impl Cli {
    pub fn into_config(self) -> anyhow::Result<NodeConfig> {
        let timing = match &self.config {
            Some(path) => load_timing(path)?,
            None => RaftTiming::default(),
        };
        Ok(NodeConfig {
            node_id: self.node_id,
            http_port: self.http_port,
            raft_port: self.raft_port,
            pg_port: self.pg_port,
            data_dir: self.data_dir,
            raft_host: self.raft_host,
            join: self.join,
            timing,
        })
    }
}

fn load_timing(path: &Path) -> anyhow::Result<RaftTiming> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let file: FileConfig =
        toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))?;
    Ok(file.raft)
}

impl NodeConfig {
    /// `<data>/data<id>.redb`
    pub fn keyspace_path(&self) -> PathBuf {
        self.data_dir.join(format!("data{}.redb", self.node_id))
    }

    /// `<data>/raft<id>`
    pub fn raft_dir(&self) -> PathBuf {
        self.data_dir.join(format!("raft{}", self.node_id))
    }

    pub fn log_path(&self) -> PathBuf {
        self.raft_dir().join("log.redb")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.raft_dir().join("snapshots")
    }
}

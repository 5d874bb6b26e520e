//! raftgresd: one replica of a raftgres cluster.
//!
//! # Usage
//!
//! ```text
//! raftgresd --node-id node1 --http-port 8001 --raft-port 5001 --pg-port 6001
//! raftgresd --node-id node2 --http-port 8002 --raft-port 5002 --pg-port 6002 --join
//! curl 'localhost:8001/add-follower?id=node2&addr=localhost:5002'
//! ```

use clap::Parser;
use raftgresd::{Cli, Node};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,raftgres=debug")),
        )
        .init();

    let config = Cli::parse().into_config()?;
    let node = Node::start(config).await?;

    let fatal = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            None
        }
        fatal = node.halted() => Some(fatal),
    };

    match fatal {
        None => {
            info!("shutdown signal received");
            node.shutdown().await
        }
        Some(fatal) => {
            error!(error = %fatal, "raft stopped, replica state can no longer be trusted");
            anyhow::bail!("fatal raft error: {fatal}")
        }
    }
}

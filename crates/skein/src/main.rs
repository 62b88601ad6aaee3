//! Node launcher.
//!
//! Reads a `key = value` configuration file, starts a node, and runs its
//! role until the body returns or SIGINT arrives. Exits non-zero on
//! configuration or bind failures.

use clap::Parser;
use skein::{ClosureRegistry, Node, NodeConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "skein", about = "Run a skein node")]
struct Args {
    /// Path to the configuration file (`key = value` lines).
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let pairs = match read_pairs(&args.config) {
        Ok(pairs) => pairs,
        Err(err) => {
            tracing::error!(path = %args.config.display(), %err, "cannot read configuration");
            return ExitCode::FAILURE;
        }
    };
    let config = match NodeConfig::from_pairs(pairs) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let node = match Node::start(config, ClosureRegistry::new()).await {
        Ok(node) => node,
        Err(err) => {
            tracing::error!(%err, "node failed to start");
            return ExitCode::FAILURE;
        }
    };

    node.run().await;
    node.shutdown().await;
    ExitCode::SUCCESS
}

/// Parses `key = value` lines; `#` starts a comment, blanks are skipped.
fn read_pairs(path: &PathBuf) -> std::io::Result<Vec<(String, String)>> {
    let text = std::fs::read_to_string(path)?;
    let mut pairs = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            pairs.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    Ok(pairs)
}

//! Standalone relay binary.
//!
//! Usage:
//!   cargo run -p replica_server -- [--addr 127.0.0.1:40000] [--config world.json]
//!
//! The relay accepts client connections, records the entities they spawn and
//! forwards entity patches and chat to every other client.

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use replica_server::RelayServer;
use replica_shared::config::WorldConfig;
use tracing::info;

fn parse_args() -> anyhow::Result<WorldConfig> {
    let args: Vec<String> = env::args().collect();
    let mut config: Option<PathBuf> = None;
    let mut addr: Option<String> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--config" if i + 1 < args.len() => {
                config = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            _ => i += 1,
        }
    }
    let mut cfg = match config {
        Some(path) => WorldConfig::load(&path)?,
        None => WorldConfig::default(),
    };
    if let Some(addr) = addr {
        cfg.server_addr = addr;
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.server_addr, "Starting relay");

    let server = RelayServer::bind(cfg).await.context("bind relay")?;
    server.run().await
}

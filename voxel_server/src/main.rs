//! Standalone relay binary.
//!
//! Usage:
//!   cargo run -p voxel_server -- [--port 8080] [--host 0.0.0.0]
//!                                [--data-dir data] [--debounce-ms 250]
//!
//! The port defaults to `$PORT`, then 8080. The world is loaded from
//! `<data-dir>/world.json` before the listener accepts connections and is
//! flushed once more on Ctrl-C.

use std::env;

use anyhow::Context;
use tracing::{info, warn};
use voxel_server::RelayServer;
use voxel_shared::config::RelayConfig;

fn parse_args() -> RelayConfig {
    let mut cfg = RelayConfig::from_env();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                cfg.port = args[i + 1].parse().unwrap_or(cfg.port);
                i += 2;
            }
            "--host" if i + 1 < args.len() => {
                cfg.bind_host = args[i + 1].clone();
                i += 2;
            }
            "--data-dir" if i + 1 < args.len() => {
                cfg.data_dir = args[i + 1].clone();
                i += 2;
            }
            "--debounce-ms" if i + 1 < args.len() => {
                cfg.persist_debounce_ms = args[i + 1].parse().unwrap_or(cfg.persist_debounce_ms);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(port = cfg.port, data_dir = %cfg.data_dir, "Starting relay");

    let server = RelayServer::bind(cfg).await.context("create relay")?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
}

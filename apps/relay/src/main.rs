//! Handoff relay entry point.
//!
//! Usage: `handoff-relay [config.toml]`

mod config;

use std::sync::Arc;

use handoff_rendezvous::{RelayServer, SignalingRelay};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting handoff relay");

    let path = std::env::args_os().nth(1).map(std::path::PathBuf::from);
    let config = config::RelayConfig::load(path.as_deref())?;
    tracing::info!(bind = %config.bind_address, port = config.port, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("relay shut down cleanly");
    Ok(())
}

async fn run(config: config::RelayConfig) -> anyhow::Result<()> {
    let server = RelayServer::new(config.server_config(), SignalingRelay::new());
    let server_run = Arc::clone(&server);
    let mut serving = tokio::spawn(async move { server_run.run().await });

    tokio::select! {
        result = &mut serving => {
            // The accept loop only returns early on a bind or accept failure.
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    server.shutdown();
    serving.await??;
    Ok(())
}

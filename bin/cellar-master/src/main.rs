//! Cellar Metadata Master
//!
//! The single process that owns the ordered KV store and the namespace
//! manifest, serving metadata RPC to worker processes on this host.

use anyhow::Result;
use cellar_common::{MasterConfig, SystemClock};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cellar-master")]
#[command(about = "Cellar Metadata Master")]
#[command(version)]
struct Args {
    /// Directory holding the KV store and the manifest
    #[arg(short, long, default_value = "/var/lib/cellar")]
    metadata_path: PathBuf,

    /// Listen address for metadata RPC
    #[arg(short, long, default_value = "127.0.0.1:9990")]
    listen: SocketAddr,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Cellar Metadata Master");

    let config = MasterConfig {
        metadata_path: args.metadata_path,
        listen: args.listen,
    };

    let state = cellar_core::bootstrap(&config, &SystemClock).await?;
    let listener = TcpListener::bind(config.listen).await?;

    tokio::select! {
        result = cellar_core::serve(state, listener) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    info!("Metadata master shut down gracefully");
    Ok(())
}

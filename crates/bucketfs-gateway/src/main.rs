#![warn(missing_docs)]

//! BucketFS gateway daemon

use anyhow::Result;
use bucketfs_gateway::{ExportManager, GatewayConfig};
use bucketfs_meta::{MemoryObjectStore, StoreContext};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "bucketfs-gateway")]
#[command(about = "BucketFS gateway: object-store buckets as a file namespace", long_about = None)]
struct Cli {
    /// Gateway configuration file (.toml or .json)
    #[arg(short, long, env = "BUCKETFS_CONFIG")]
    config: Option<PathBuf>,

    /// Extra bucket to pre-create in the in-memory store; repeatable
    #[arg(short, long = "bucket")]
    buckets: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    tracing::info!("BucketFS gateway starting...");

    let store = Arc::new(MemoryObjectStore::new());
    let export_buckets = config.exports.iter().map(|e| &e.bucket);
    for bucket in cli.buckets.iter().chain(export_buckets) {
        store.create_bucket(bucket);
    }
    let ctx = Arc::new(StoreContext::new(store));
    let manager = ExportManager::new(ctx);

    for export in config.exports {
        let path = export.path.clone();
        let root = manager.add_export(export)?;
        tracing::info!(path = %path, root = ?root.data, "export ready");
    }
    if manager.count() == 0 {
        tracing::warn!("no exports configured");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    manager.shutdown();
    Ok(())
}

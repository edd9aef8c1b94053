//! Standalone DDS server over an in-memory archive
//!
//! Usage:
//!   dds_server --config config/lrgs.toml

use anyhow::{Context, Result};
use clap::Parser;
use dds_config::ConfigHandle;
use dds_server::{MemoryArchive, ProtocolServer};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dds_server")]
#[command(about = "DCP message distribution server")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = Arc::new(
        ConfigHandle::load(&args.config)
            .with_context(|| format!("Failed to load configuration from {}", args.config))?,
    );
    let server = ProtocolServer::new(config, Arc::new(MemoryArchive::new()));
    let listener = server.bind().await?;

    let serving = tokio::spawn(server.clone().serve(listener));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C handler")?;
    info!("Received shutdown signal");
    server.shutdown();

    match serving.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "Server failed");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    if args.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

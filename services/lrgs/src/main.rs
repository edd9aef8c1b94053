//! LRGS: distribution server and netback receiver over one archive
//!
//! The receiver pulls from upstream DDS peers into the archive; the server
//! hands the same archive out to local clients.
//!
//! Usage:
//!   lrgs --config config/lrgs.toml
//!   lrgs --config config/lrgs.toml --frames 0.0.0.0:17000

use anyhow::{Context, Result};
use clap::Parser;
use dds_config::ConfigHandle;
use dds_network::{ConnectionPool, LddsRecvConnection};
use dds_recv::{
    liveness, FrameIntake, GapRecoveryEngine, JsonFileOutageStore, LastReceiveFile, MessageSink, OutageQueue,
    RawFrame, UdpFrameSource,
};
use dds_server::{MemoryArchive, ProtocolServer};
use dds_types::DcpMessage;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const FRAME_POLL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "lrgs")]
#[command(about = "DCP distribution server with netback recovery")]
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

    /// Listen for raw satellite frames on this UDP address
    #[arg(long)]
    frames: Option<SocketAddr>,
}

/// Recovered messages go straight into the shared archive.
struct ArchiveSink(Arc<MemoryArchive>);

impl MessageSink for ArchiveSink {
    fn archive(&self, message: DcpMessage, source: &str) -> dds_recv::Result<()> {
        let entry = self.0.append(message);
        debug!(address = %entry.address, source, "Archived upstream message");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = Arc::new(
        ConfigHandle::load(&args.config)
            .with_context(|| format!("Failed to load configuration from {}", args.config))?,
    );
    let recv = config.current().recv.clone();
    let archive = Arc::new(MemoryArchive::new());
    let (stop, shutdown) = watch::channel(false);

    let server = ProtocolServer::new(config.clone(), archive.clone());
    let listener = server.bind().await?;
    let serving = tokio::spawn(server.clone().serve(listener));

    let pool = Arc::new(ConnectionPool::new(
        LddsRecvConnection::from_settings(&recv.group_connections(), recv.timeout()),
        recv.reconnect_interval(),
    ));
    let store = JsonFileOutageStore::open(&recv.outage_file)
        .with_context(|| format!("Failed to open outage file {}", recv.outage_file.display()))?;
    let queue = OutageQueue::new(Arc::new(store));
    let last_receive = Arc::new(LastReceiveFile::load(&recv.last_receive_file));

    let engine = GapRecoveryEngine::new(
        config.clone(),
        pool.clone(),
        queue.clone(),
        Arc::new(ArchiveSink(archive.clone())),
        last_receive,
    );
    engine.bootstrap().context("Failed to register startup outages")?;
    let intake = tokio::spawn(engine.run(shutdown.clone()));

    tokio::spawn(liveness::run_keepalive(config.clone(), pool.clone(), shutdown.clone()));
    tokio::spawn(liveness::run_config_watch(config.clone(), pool.clone(), shutdown.clone()));

    if let Some(addr) = args.frames {
        let source = UdpFrameSource::bind("frames", addr).await?;
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(drain_frames(rx));
        let frames = FrameIntake::new(source, queue, tx, FRAME_POLL);
        let frame_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = frames.run(frame_shutdown).await {
                error!(error = %e, "Raw frame intake stopped");
            }
        });
    }

    info!(
        connections = pool.len(),
        listen = %config.current().server.listen_addr,
        "LRGS running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C handler")?;
    info!("Received shutdown signal");
    server.shutdown();
    let _ = stop.send(true);

    if let Err(e) = intake.await {
        warn!(error = %e, "Recovery engine task ended abnormally");
    }
    match serving.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "Server failed");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Frame payload decoding lives downstream of this crate; count what arrives.
async fn drain_frames(mut rx: mpsc::Receiver<RawFrame>) {
    let mut count: u64 = 0;
    while let Some(frame) = rx.recv().await {
        count += 1;
        debug!(sequence = frame.sequence, bytes = frame.payload.len(), "Raw frame");
    }
    info!(frames = count, "Raw frame stream closed");
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    if args.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

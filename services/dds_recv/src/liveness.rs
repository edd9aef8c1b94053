//! Background upkeep of the upstream pool
//!
//! Two periodic tasks run beside the recovery engine: a keep-alive sweep for
//! idle peers that are not current, and a configuration check that rebuilds
//! the pool when the connection list changes.

use dds_config::{ConfigHandle, ConnectionSettings};
use dds_network::{ConnectionPool, LddsRecvConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Sleeps for `period` unless shutdown arrives first. Returns false on
/// shutdown.
async fn tick(period: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let closed = tokio::select! {
        _ = tokio::time::sleep(period) => false,
        changed = shutdown.changed() => changed.is_err(),
    };
    !closed && !*shutdown.borrow()
}

/// Pings idle non-current peers once per keep-alive interval.
pub async fn run_keepalive(
    config: Arc<ConfigHandle>,
    pool: Arc<ConnectionPool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let keepalive = config.current().recv.keepalive();
        if !tick(keepalive.max(Duration::from_secs(1)), &mut shutdown).await {
            break;
        }
        let pinged = pool.keepalive_sweep(keepalive).await;
        if pinged > 0 {
            debug!(pinged, "Keep-alive sweep");
        }
    }
    debug!("Keep-alive task stopped");
}

/// Watches the configuration file and swaps the pool's connection set when
/// the receive group's connections change.
pub async fn run_config_watch(
    config: Arc<ConfigHandle>,
    pool: Arc<ConnectionPool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut active = config.current().recv.group_connections();
    loop {
        let period = config.current().recv.config_check_interval();
        if !tick(period, &mut shutdown).await {
            break;
        }
        match config.reload_if_changed() {
            Ok(true) => {
                if let Some(next) = apply_connection_changes(&config, &pool, &active).await {
                    active = next;
                }
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Configuration check failed"),
        }
    }
    debug!("Configuration watch stopped");
}

/// Rebuilds the pool if the connection list differs from `active`. Returns
/// the new list when it did.
pub async fn apply_connection_changes(
    config: &ConfigHandle,
    pool: &ConnectionPool,
    active: &[ConnectionSettings],
) -> Option<Vec<ConnectionSettings>> {
    let current = config.current();
    let recv = &current.recv;
    let wanted = recv.group_connections();
    if wanted == active {
        return None;
    }
    info!(
        before = active.len(),
        after = wanted.len(),
        "Upstream connection list changed"
    );
    pool.replace_all(LddsRecvConnection::from_settings(&wanted, recv.timeout()))
        .await;
    Some(wanted)
}

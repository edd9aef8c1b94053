//! Failover Connection Pool
//!
//! Priority-ordered upstream peers. The first enabled peer that is connected,
//! or can be connected, becomes "current". Any failure on the current peer is
//! reported with [`ConnectionPool::clear_current`] and the next request
//! re-selects, possibly a different peer.
//!
//! Sequence-range recovery instead walks every peer exactly once with
//! [`ConnectionPool::untried_connection`], since no single peer is assumed to
//! hold the whole range.

use super::RecvConnection;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Snapshot counters for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub enabled: usize,
    pub connected: usize,
    pub current: Option<String>,
}

pub struct ConnectionPool {
    /// In priority order
    connections: RwLock<Vec<Arc<dyn RecvConnection>>>,
    current: Mutex<Option<Arc<dyn RecvConnection>>>,
    /// Last connect attempt per connection name
    last_attempt: Mutex<HashMap<String, Instant>>,
    reconnect_interval: Duration,
}

impl ConnectionPool {
    pub fn new(connections: Vec<Arc<dyn RecvConnection>>, reconnect_interval: Duration) -> Self {
        Self {
            connections: RwLock::new(connections),
            current: Mutex::new(None),
            last_attempt: Mutex::new(HashMap::new()),
            reconnect_interval,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    pub fn connections(&self) -> Vec<Arc<dyn RecvConnection>> {
        self.connections.read().clone()
    }

    /// The current connection without trying to select one.
    pub fn current(&self) -> Option<Arc<dyn RecvConnection>> {
        self.current.lock().clone()
    }

    pub fn is_current(&self, name: &str) -> bool {
        self.current.lock().as_ref().is_some_and(|c| c.name() == name)
    }

    /// Returns the current connection, selecting the highest-priority usable
    /// peer if there is none. Connect attempts per peer are throttled to one
    /// per reconnect interval.
    pub async fn current_connection(&self) -> Option<Arc<dyn RecvConnection>> {
        if let Some(conn) = self.current() {
            if conn.is_connected() {
                return Some(conn);
            }
            self.clear_current();
        }

        for conn in self.connections() {
            if !conn.is_enabled() {
                continue;
            }
            if conn.is_connected() {
                self.set_current(&conn);
                return Some(conn);
            }
            if !self.attempt_allowed(conn.name()) {
                continue;
            }
            match conn.connect().await {
                Ok(()) => {
                    self.set_current(&conn);
                    return Some(conn);
                }
                Err(e) => warn!(connection = %conn.name(), error = %e, "Connect failed"),
            }
        }
        None
    }

    /// Returns an enabled peer whose name is not in `tried`, connecting it if
    /// needed, and adds it to `tried`. Peers that fail to connect are marked
    /// tried as well, so a sweep ends after at most one call per peer.
    pub async fn untried_connection(
        &self,
        tried: &mut HashSet<String>,
    ) -> Option<Arc<dyn RecvConnection>> {
        for conn in self.connections() {
            if !conn.is_enabled() || tried.contains(conn.name()) {
                continue;
            }
            tried.insert(conn.name().to_string());

            if !conn.is_connected() {
                self.last_attempt
                    .lock()
                    .insert(conn.name().to_string(), Instant::now());
                if let Err(e) = conn.connect().await {
                    warn!(connection = %conn.name(), error = %e, "Connect failed during sweep");
                    continue;
                }
            }
            self.set_current(&conn);
            return Some(conn);
        }
        None
    }

    /// Forgets the current selection. The connection itself is left as is.
    pub fn clear_current(&self) {
        if let Some(conn) = self.current.lock().take() {
            debug!(connection = %conn.name(), "Cleared current connection");
        }
    }

    /// Replaces the whole peer set, e.g. after a configuration reload. Old
    /// peers are disconnected.
    pub async fn replace_all(&self, connections: Vec<Arc<dyn RecvConnection>>) {
        let old = std::mem::replace(&mut *self.connections.write(), connections);
        self.clear_current();
        self.last_attempt.lock().clear();
        for conn in old {
            conn.disconnect().await;
        }
        info!(count = self.len(), "Connection set replaced");
    }

    pub async fn disconnect_all(&self) {
        self.clear_current();
        for conn in self.connections() {
            if conn.is_connected() {
                conn.disconnect().await;
            }
        }
    }

    /// Sends a keep-alive to every connected peer other than the current one
    /// that has been idle for longer than `idle`. Peers that fail are
    /// disconnected. Returns the number of peers pinged.
    pub async fn keepalive_sweep(&self, idle: Duration) -> usize {
        let idle = chrono::Duration::from_std(idle).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut pinged = 0;
        for conn in self.connections() {
            if !conn.is_connected() || self.is_current(conn.name()) {
                continue;
            }
            let stale = conn.stats().idle_for().map_or(true, |d| d > idle);
            if !stale {
                continue;
            }
            pinged += 1;
            if let Err(e) = conn.send_noop().await {
                warn!(connection = %conn.name(), error = %e, "Keep-alive failed, disconnecting");
                conn.disconnect().await;
            }
        }
        pinged
    }

    pub fn stats(&self) -> PoolStats {
        let conns = self.connections();
        PoolStats {
            total: conns.len(),
            enabled: conns.iter().filter(|c| c.is_enabled()).count(),
            connected: conns.iter().filter(|c| c.is_connected()).count(),
            current: self.current().map(|c| c.name().to_string()),
        }
    }

    fn set_current(&self, conn: &Arc<dyn RecvConnection>) {
        let mut current = self.current.lock();
        if current.as_ref().map(|c| c.name()) != Some(conn.name()) {
            info!(connection = %conn.name(), "Selected current connection");
        }
        *current = Some(conn.clone());
    }

    fn attempt_allowed(&self, name: &str) -> bool {
        let mut attempts = self.last_attempt.lock();
        let now = Instant::now();
        match attempts.get(name) {
            Some(last) if now.duration_since(*last) < self.reconnect_interval => false,
            _ => {
                attempts.insert(name.to_string(), now);
                true
            }
        }
    }
}

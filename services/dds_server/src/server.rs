//! # Protocol Server
//!
//! Accepts LDDS clients and runs one task per client. A housekeeping task
//! hangs up idle clients, follows the configured enable flag and reloads
//! network lists when their files change.
//!
//! ## Admission
//! A connection is closed straight away, with only a local log line, when
//! the server is disabled, already serving `max_clients`, or has no free
//! status slot.
//!
//! ## Shutdown and disable
//! Each client task watches a per-client hangup signal, so disabling the
//! server or a housekeeping hangup takes effect at the client's next await
//! point rather than by aborting the task.

use crate::archive::MessageArchive;
use crate::connection_id::{ConnectionId, ConnectionIdCounter};
use crate::error::{Result, ServerError};
use crate::handler;
use crate::netlists::NetlistRegistry;
use dds_config::ConfigHandle;
use dds_network::{ConnectionState, ConnectionStats, ConnectionStatus, FrameConnection};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Shared state of one connected client
pub struct ClientHandle {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    slot: usize,
    user: RwLock<Option<String>>,
    protocol_version: AtomicU32,
    stats: Arc<ConnectionStats>,
    last_activity: Mutex<Instant>,
    hangup: AtomicBool,
    wake: Notify,
}

impl ClientHandle {
    fn new(id: ConnectionId, peer: SocketAddr, slot: usize) -> Self {
        let stats = Arc::new(ConnectionStats::new(id, format!("ddsclient-{}", id), peer.to_string()));
        stats.set_state(ConnectionState::Connected);
        Self {
            id,
            peer,
            slot,
            user: RwLock::new(None),
            protocol_version: AtomicU32::new(0),
            stats,
            last_activity: Mutex::new(Instant::now()),
            hangup: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn user(&self) -> Option<String> {
        self.user.read().clone()
    }

    pub(crate) fn attach(&self, user: &str, protocol_version: u32) {
        *self.user.write() = Some(user.to_string());
        self.protocol_version.store(protocol_version, Ordering::Relaxed);
        self.stats.set_state(ConnectionState::Receiving);
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Marks a request from the client.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
        self.stats.record_activity();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn request_hangup(&self) {
        self.hangup.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    pub fn is_hung_up(&self) -> bool {
        self.hangup.load(Ordering::Acquire)
    }

    pub(crate) async fn hangup_requested(&self) {
        if !self.is_hung_up() {
            self.wake.notified().await;
        }
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            slot: self.slot,
            user: self.user(),
            protocol_version: self.protocol_version.load(Ordering::Relaxed),
            connection: self.stats.snapshot(),
        }
    }
}

/// Read-only view of one client for monitoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStatus {
    pub slot: usize,
    pub user: Option<String>,
    pub protocol_version: u32,
    pub connection: ConnectionStatus,
}

pub struct ProtocolServer {
    config: Arc<ConfigHandle>,
    archive: Arc<dyn MessageArchive>,
    netlists: Arc<NetlistRegistry>,
    ids: ConnectionIdCounter,
    clients: RwLock<HashMap<ConnectionId, Arc<ClientHandle>>>,
    slots: Mutex<Vec<Option<ConnectionId>>>,
    enabled: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl ProtocolServer {
    pub fn new(config: Arc<ConfigHandle>, archive: Arc<dyn MessageArchive>) -> Arc<Self> {
        let settings = config.current().server.clone();
        let ids = ConnectionIdCounter::load(&settings.connection_id_file);
        Self::with_counter(config, archive, ids)
    }

    /// Server whose connection ids are not persisted.
    pub fn with_counter(
        config: Arc<ConfigHandle>,
        archive: Arc<dyn MessageArchive>,
        ids: ConnectionIdCounter,
    ) -> Arc<Self> {
        let settings = config.current().server.clone();
        let netlists = Arc::new(NetlistRegistry::new(&settings.netlist_dir));
        netlists.check_for_changes();
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            config,
            archive,
            netlists,
            ids,
            clients: RwLock::new(HashMap::new()),
            slots: Mutex::new(vec![None; settings.status_slots]),
            enabled: AtomicBool::new(settings.enabled),
            shutdown,
        })
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn archive(&self) -> &Arc<dyn MessageArchive> {
        &self.archive
    }

    pub fn netlists(&self) -> &NetlistRegistry {
        &self.netlists
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.current().server.listen_addr.clone();
        TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::io(format!("bind {}", addr), e))
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serves clients from `listener` until [`shutdown`](Self::shutdown).
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local = listener
            .local_addr()
            .map_err(|e| ServerError::io("listener address", e))?;
        info!(addr = %local, enabled = self.is_enabled(), "DDS server listening");

        let housekeeping = tokio::spawn(self.clone().housekeeping());
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.changed() => break,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let Some(client) = self.admit(peer) else {
                        drop(stream);
                        continue;
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Cannot set TCP_NODELAY");
                    }
                    let conn = FrameConnection::new(stream, peer);
                    tokio::spawn(handler::serve_client(self.clone(), client, conn));
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        let _ = housekeeping.await;
        info!("DDS server stopped");
        Ok(())
    }

    /// Stops accepting, hangs up every client and ends housekeeping.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.hangup_all();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Disabling hangs up every client and refuses new ones until
    /// re-enabled. Housekeeping re-applies the configured flag on each pass.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::AcqRel);
        if was == enabled {
            return;
        }
        if enabled {
            info!("DDS server enabled");
        } else {
            info!(clients = self.client_count(), "DDS server disabled, disconnecting all clients");
            self.hangup_all();
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    pub fn active_clients(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.clients.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn client(&self, id: ConnectionId) -> Option<Arc<ClientHandle>> {
        self.clients.read().get(&id).cloned()
    }

    pub fn status_snapshot(&self) -> Vec<ClientStatus> {
        let mut statuses: Vec<_> = self.clients.read().values().map(|c| c.status()).collect();
        statuses.sort_by_key(|s| s.connection.id);
        statuses
    }

    /// Hangs up every client idle longer than the configured threshold.
    /// Returns how many were hung up.
    pub fn housekeeping_pass(&self) -> usize {
        let hangup = self.config.current().server.hangup();
        let idle: Vec<Arc<ClientHandle>> = self
            .clients
            .read()
            .values()
            .filter(|c| c.idle_for() > hangup)
            .cloned()
            .collect();

        for client in &idle {
            info!(
                connection_id = client.id,
                peer = %client.peer,
                idle_secs = client.idle_for().as_secs(),
                "Hanging up idle client"
            );
            client.request_hangup();
            self.remove_client(client.id);
        }
        idle.len()
    }

    async fn housekeeping(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut last_netlist_check = Instant::now();

        loop {
            let config = self.config.current();
            tokio::select! {
                _ = tokio::time::sleep(config.server.housekeeping_interval()) => {}
                _ = shutdown.changed() => break,
            }

            self.set_enabled(config.server.enabled);
            self.housekeeping_pass();

            if last_netlist_check.elapsed() >= config.server.netlist_check_interval() {
                if self.netlists.check_for_changes() {
                    info!(lists = self.netlists.len(), "Network lists changed");
                }
                last_netlist_check = Instant::now();
            }
        }
        debug!("Housekeeping stopped");
    }

    fn admit(&self, peer: SocketAddr) -> Option<Arc<ClientHandle>> {
        if !self.is_enabled() {
            info!(peer = %peer, "Rejecting connection: server disabled");
            return None;
        }
        let max_clients = self.config.current().server.max_clients;
        if self.client_count() >= max_clients {
            warn!(peer = %peer, max_clients, "Rejecting connection: at client capacity");
            return None;
        }

        let mut slots = self.slots.lock();
        let Some(slot) = slots.iter().position(Option::is_none) else {
            warn!(peer = %peer, "Rejecting connection: no free status slot");
            return None;
        };
        let id = self.ids.next_id();
        slots[slot] = Some(id);
        drop(slots);

        let client = Arc::new(ClientHandle::new(id, peer, slot));
        self.clients.write().insert(id, client.clone());
        info!(connection_id = id, peer = %peer, slot, "Accepted client");
        Some(client)
    }

    pub(crate) fn remove_client(&self, id: ConnectionId) {
        if let Some(client) = self.clients.write().remove(&id) {
            client.stats.set_state(ConnectionState::Disconnected);
            let mut slots = self.slots.lock();
            if slots.get(client.slot).copied().flatten() == Some(id) {
                slots[client.slot] = None;
            }
        }
    }

    fn hangup_all(&self) {
        let clients: Vec<_> = self.clients.read().values().cloned().collect();
        for client in clients {
            client.request_hangup();
            self.remove_client(client.id);
        }
    }
}

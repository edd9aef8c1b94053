//! LDDS client connection to an upstream DDS server
//!
//! Each call holds the link lock for its whole exchange, so the intake task
//! and the liveness task can share one connection without interleaving
//! frames. A block request that outlives the caller's wait stays outstanding
//! and its response is picked up by the next call.

use super::metrics::{ConnectionState, ConnectionStats};
use super::tcp::FrameConnection;
use super::RecvConnection;
use crate::{Result, TransportError};
use async_trait::async_trait;
use chrono::Utc;
use dds_codec::{decode_block, AuthHello, Frame, Hello, MessageId};
use dds_config::ConnectionSettings;
use dds_types::{DapsStatusMode, DcpMessage, SearchCriteria};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest a server may take to answer a block request.
const BLOCK_REPLY_BOUND: Duration = Duration::from_secs(60);
const GOODBYE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_USER: &str = "dds";

#[derive(Default)]
struct Link {
    conn: Option<FrameConnection>,
    buffered: VecDeque<DcpMessage>,
    awaiting_block: bool,
    last_message: Option<Instant>,
}

pub struct LddsRecvConnection {
    name: String,
    settings: ConnectionSettings,
    stats: Arc<ConnectionStats>,
    link: Mutex<Link>,
    connected: AtomicBool,
    silence_timeout: Duration,
}

impl LddsRecvConnection {
    pub fn new(id: u64, settings: ConnectionSettings, silence_timeout: Duration) -> Self {
        let name = settings.display_name();
        let stats = Arc::new(ConnectionStats::new(id, name.clone(), settings.host.clone()));
        Self {
            name,
            settings,
            stats,
            link: Mutex::new(Link::default()),
            connected: AtomicBool::new(false),
            silence_timeout,
        }
    }

    /// Builds one connection per settings entry, in order.
    pub fn from_settings(
        settings: &[ConnectionSettings],
        silence_timeout: Duration,
    ) -> Vec<Arc<dyn RecvConnection>> {
        settings
            .iter()
            .enumerate()
            .map(|(idx, s)| {
                Arc::new(Self::new(idx as u64 + 1, s.clone(), silence_timeout)) as Arc<dyn RecvConnection>
            })
            .collect()
    }

    fn user(&self) -> &str {
        if self.settings.username.is_empty() {
            DEFAULT_USER
        } else {
            &self.settings.username
        }
    }

    fn hello_frame(&self) -> Result<Frame> {
        let frame = if self.settings.authenticate {
            let password = self.settings.password.as_deref().ok_or_else(|| {
                TransportError::configuration(
                    format!("{}: authenticate requires a password", self.name),
                    Some("password"),
                )
            })?;
            Frame::text(
                MessageId::AuthHello,
                &AuthHello::sign(self.user(), password, Utc::now()).encode(),
            )?
        } else {
            Frame::text(MessageId::Hello, &Hello::new(self.user()).encode())?
        };
        Ok(frame)
    }

    async fn drop_link(&self, link: &mut Link) {
        if let Some(mut conn) = link.conn.take() {
            conn.shutdown().await;
        }
        link.buffered.clear();
        link.awaiting_block = false;
        self.connected.store(false, Ordering::Release);
        self.stats.set_state(ConnectionState::Disconnected);
    }

    /// Sends `request` and waits for the matching reply. Any transport
    /// failure drops the link.
    async fn exchange(&self, link: &mut Link, request: &Frame, timeout: Duration) -> Result<Frame> {
        let result = match link.conn.as_mut() {
            None => Err(TransportError::NotConnected {
                name: self.name.clone(),
            }),
            Some(conn) => match conn.send_frame(request).await {
                Err(e) => Err(e),
                Ok(()) => match tokio::time::timeout(timeout, conn.receive_frame()).await {
                    Err(_) => Err(TransportError::timeout(
                        format!("{:?} reply", request.id),
                        timeout.as_millis() as u64,
                    )),
                    Ok(reply) => reply,
                },
            },
        };

        match result {
            Ok(reply) if reply.id != request.id => {
                self.stats.record_error();
                self.drop_link(link).await;
                Err(TransportError::protocol(format!(
                    "{}: expected {:?} reply, got {:?}",
                    self.name, request.id, reply.id
                )))
            }
            Ok(reply) => {
                self.stats.record_activity();
                Ok(reply)
            }
            Err(e) => {
                if e.is_fatal_to_connection() {
                    self.stats.record_error();
                    self.drop_link(link).await;
                }
                Err(e)
            }
        }
    }

    /// Consumes the reply to a block request abandoned by an earlier wait.
    async fn drain_pending_block(&self, link: &mut Link) -> Result<()> {
        if !link.awaiting_block {
            return Ok(());
        }
        let drained = match link.conn.as_mut() {
            Some(conn) => tokio::time::timeout(BLOCK_REPLY_BOUND, conn.receive_frame()).await,
            None => return Ok(()),
        };
        link.awaiting_block = false;
        match drained {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                self.drop_link(link).await;
                Err(e)
            }
            Err(_) => {
                self.drop_link(link).await;
                Err(TransportError::timeout(
                    "pending block reply",
                    BLOCK_REPLY_BOUND.as_millis() as u64,
                ))
            }
        }
    }

    /// Nothing arrived. Fine unless the peer has been silent too long.
    async fn idle_result(&self, link: &mut Link) -> Result<Option<DcpMessage>> {
        let silent = link.last_message.map(|t| t.elapsed()).unwrap_or_default();
        if silent > self.silence_timeout {
            warn!(
                connection = %self.name,
                silent_secs = silent.as_secs(),
                "No messages within timeout, disconnecting"
            );
            self.stats.record_error();
            self.drop_link(link).await;
            return Err(TransportError::timeout(
                "message receive",
                self.silence_timeout.as_millis() as u64,
            ));
        }
        Ok(None)
    }
}

#[async_trait]
impl RecvConnection for LddsRecvConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn stats(&self) -> Arc<ConnectionStats> {
        self.stats.clone()
    }

    async fn connect(&self) -> Result<()> {
        let mut guard = self.link.lock().await;
        let link = &mut *guard;
        if link.conn.is_some() {
            return Ok(());
        }

        let request = self.hello_frame()?;
        let conn = FrameConnection::connect(&self.settings.host, self.settings.port, CONNECT_TIMEOUT)
            .await
            .inspect_err(|_| self.stats.record_error())?;
        let peer = conn.peer_addr();
        link.conn = Some(conn);

        let reply = self.exchange(link, &request, REPLY_TIMEOUT).await?;
        if let Some(status) = reply.status() {
            self.stats.record_error();
            self.drop_link(link).await;
            return Err(TransportError::Authentication {
                user: self.user().to_string(),
                message: status.text,
            });
        }

        link.buffered.clear();
        link.awaiting_block = false;
        link.last_message = Some(Instant::now());
        self.connected.store(true, Ordering::Release);
        self.stats.set_host(peer.to_string());
        self.stats.set_state(ConnectionState::Connected);
        self.stats.record_activity();
        info!(connection = %self.name, peer = %peer, "Connected to upstream DDS server");
        Ok(())
    }

    async fn send_criteria(&self, criteria: &SearchCriteria) -> Result<()> {
        let mut guard = self.link.lock().await;
        let link = &mut *guard;
        self.drain_pending_block(link).await?;

        let mut criteria = criteria.clone();
        criteria.daps_status = Some(if self.settings.accept_error_messages {
            DapsStatusMode::Accept
        } else {
            DapsStatusMode::Reject
        });

        let request = Frame::text(MessageId::Criteria, &criteria.to_string())?;
        let reply = self.exchange(link, &request, REPLY_TIMEOUT).await?;
        if let Some(status) = reply.status() {
            self.stats.record_error();
            return Err(TransportError::Server { status });
        }

        link.buffered.clear();
        link.last_message = Some(Instant::now());
        self.stats.set_state(ConnectionState::Receiving);
        debug!(connection = %self.name, "Search criteria accepted");
        Ok(())
    }

    async fn next_message(&self, wait: Duration) -> Result<Option<DcpMessage>> {
        let mut guard = self.link.lock().await;
        let link = &mut *guard;

        if let Some(msg) = link.buffered.pop_front() {
            return Ok(Some(msg));
        }

        let received = {
            let Some(conn) = link.conn.as_mut() else {
                return Err(TransportError::NotConnected {
                    name: self.name.clone(),
                });
            };
            if !link.awaiting_block {
                let sent = conn.send_frame(&Frame::empty(MessageId::DcpBlock)).await;
                if let Err(e) = sent {
                    self.stats.record_error();
                    self.drop_link(link).await;
                    return Err(e);
                }
                link.awaiting_block = true;
            }
            tokio::time::timeout(wait, conn.receive_frame()).await
        };

        let frame = match received {
            Err(_) => return self.idle_result(link).await,
            Ok(Err(e)) => {
                self.stats.record_error();
                self.drop_link(link).await;
                return Err(e);
            }
            Ok(Ok(frame)) => frame,
        };
        link.awaiting_block = false;
        self.stats.record_activity();

        if frame.id != MessageId::DcpBlock {
            self.stats.record_error();
            self.drop_link(link).await;
            return Err(TransportError::protocol(format!(
                "{}: expected DcpBlock reply, got {:?}",
                self.name, frame.id
            )));
        }

        if let Some(status) = frame.status() {
            if status.code.is_caught_up() {
                debug!(connection = %self.name, code = ?status.code, "Upstream caught up");
                return self.idle_result(link).await;
            }
            self.stats.record_error();
            return Err(TransportError::Server { status });
        }

        let messages = decode_block(&frame.body);
        if messages.is_empty() {
            return self.idle_result(link).await;
        }
        self.stats.record_messages(messages.len() as u64);
        link.last_message = Some(Instant::now());
        link.buffered.extend(messages);
        Ok(link.buffered.pop_front())
    }

    async fn send_noop(&self) -> Result<()> {
        let mut guard = self.link.lock().await;
        let link = &mut *guard;
        if link.awaiting_block {
            return Ok(());
        }
        self.exchange(link, &Frame::empty(MessageId::Idle), REPLY_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn disconnect(&self) {
        let mut guard = self.link.lock().await;
        let link = &mut *guard;
        if let Some(conn) = link.conn.as_mut() {
            let _ = tokio::time::timeout(
                GOODBYE_TIMEOUT,
                conn.send_frame(&Frame::empty(MessageId::Goodbye)),
            )
            .await;
            info!(connection = %self.name, "Disconnected from upstream DDS server");
        }
        self.drop_link(link).await;
    }
}

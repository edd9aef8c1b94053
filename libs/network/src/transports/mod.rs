//! Upstream Transport Layer
//!
//! The recovery engine talks to upstream peers only through [`RecvConnection`],
//! so the pool and engine can be driven by in-process peers in tests and by
//! [`upstream::LddsRecvConnection`] in production.

use crate::{Result, TransportError};
use async_trait::async_trait;
use dds_config::ConnectionSettings;
use dds_types::{DcpMessage, SearchCriteria};
use std::sync::Arc;
use std::time::Duration;

pub mod metrics;
pub mod pool;
pub mod tcp;
pub mod upstream;

pub use metrics::{ConnectionState, ConnectionStats, ConnectionStatus};
pub use pool::ConnectionPool;
pub use tcp::FrameConnection;
pub use upstream::LddsRecvConnection;

/// One upstream DDS peer as seen by the receiver
#[async_trait]
pub trait RecvConnection: Send + Sync {
    /// Unique within a pool.
    fn name(&self) -> &str;

    fn settings(&self) -> &ConnectionSettings;

    fn is_enabled(&self) -> bool {
        self.settings().enabled
    }

    fn is_connected(&self) -> bool;

    fn stats(&self) -> Arc<ConnectionStats>;

    /// Connects and completes the (optionally authenticated) hello exchange.
    async fn connect(&self) -> Result<()>;

    /// Uploads criteria; subsequent `next_message` calls return matches.
    async fn send_criteria(&self, criteria: &SearchCriteria) -> Result<()>;

    /// Waits up to `wait` for the next message.
    ///
    /// `Ok(None)` means nothing yet: the peer is caught up, reached the
    /// until-time, or the wait elapsed. An `Err` means the connection failed
    /// and has been dropped.
    async fn next_message(&self, wait: Duration) -> Result<Option<DcpMessage>>;

    /// Keep-alive exchange for an idle connection.
    async fn send_noop(&self) -> Result<()>;

    /// Send keep-alive with timeout
    async fn send_noop_timeout(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.send_noop())
            .await
            .map_err(|_| TransportError::timeout("noop", timeout.as_millis() as u64))?
    }

    async fn disconnect(&self);
}

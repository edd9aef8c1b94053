//! # DDS Server
//!
//! Serves archived DCP messages to LDDS clients.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  accept   ┌───────────────┐  init/next   ┌──────────────────┐
//! │ TcpListener  │ ────────▶ │ client task   │ ───────────▶ │ RetrievalSession │
//! └──────────────┘           │ (handler.rs)  │              └────────┬─────────┘
//!        │                   └───────────────┘                       │ search
//!        │ housekeeping                                              ▼
//! ┌──────────────┐                                         ┌──────────────────┐
//! │ProtocolServer│── idle hangup, enable flag, netlists    │  MessageArchive  │
//! └──────────────┘                                         └──────────────────┘
//! ```
//!
//! - [`ProtocolServer`]: listener, admission, housekeeping and the client table
//! - [`RetrievalSession`]: one incremental archive search per client
//! - [`SearchFilter`]: decides whether an archived message matches criteria
//! - [`MessageArchive`]: storage seam; [`MemoryArchive`] is the in-process store
//!
//! ## Usage
//!
//! ```no_run
//! use dds_config::{ConfigHandle, DdsConfig};
//! use dds_server::{MemoryArchive, ProtocolServer};
//! use std::sync::Arc;
//!
//! # async fn run() -> dds_server::Result<()> {
//! let config = Arc::new(ConfigHandle::fixed(DdsConfig::default()));
//! let archive = Arc::new(MemoryArchive::new());
//! ProtocolServer::new(config, archive).run().await
//! # }
//! ```

pub mod archive;
pub mod connection_id;
pub mod error;
pub mod filter;
pub mod handler;
pub mod netlists;
pub mod server;
pub mod session;

pub use archive::{MemoryArchive, MessageArchive, SearchHandle, SearchMethod, SearchResult};
pub use connection_id::{ConnectionId, ConnectionIdCounter};
pub use error::{Result, ServerError};
pub use filter::{FilterOptions, SearchFilter};
pub use netlists::NetlistRegistry;
pub use server::{ClientHandle, ClientStatus, ProtocolServer};
pub use session::{NextIndex, RetrievalSession, SaveLastPolicy, SessionState};

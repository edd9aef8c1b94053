//! # DDS Netback Receiver
//!
//! Pulls DCP messages from upstream DDS servers into the local archive and
//! backfills whatever the local links missed.
//!
//! Every gap is an [`Outage`](dds_types::Outage) in the [`OutageQueue`]. The
//! [`GapRecoveryEngine`] always works the highest-priority active one,
//! phrasing its criteria through the per-kind [`Strategy`] table and
//! releasing it exactly once when it is recovered, partially recovered,
//! failed or preempted. Real-time intake is modelled as a perpetual,
//! lowest-priority outage.
//!
//! ## Components
//!
//! - [`OutageStore`]: persistence seam, with [`MemoryOutageStore`] and
//!   [`JsonFileOutageStore`]
//! - [`SequenceTracker`]: which sequence numbers of a missing run came back
//! - [`RawFrameSource`] and [`SequenceGapDetector`]: turn holes in a local
//!   satellite frame stream into sequence outages
//! - [`liveness`]: keep-alive and configuration-reload tasks for the pool
//!
//! ## Usage
//!
//! ```no_run
//! use dds_config::{ConfigHandle, DdsConfig};
//! use dds_network::{ConnectionPool, LddsRecvConnection};
//! use dds_recv::{GapRecoveryEngine, LastReceiveFile, MemoryOutageStore, MessageSink, OutageQueue};
//! use std::sync::Arc;
//!
//! # async fn run(sink: Arc<dyn MessageSink>) -> dds_recv::Result<()> {
//! let config = Arc::new(ConfigHandle::fixed(DdsConfig::default()));
//! let recv = config.current().recv.clone();
//! let pool = Arc::new(ConnectionPool::new(
//!     LddsRecvConnection::from_settings(&recv.group_connections(), recv.timeout()),
//!     recv.reconnect_interval(),
//! ));
//! let queue = OutageQueue::new(Arc::new(MemoryOutageStore::new()));
//! let last = Arc::new(LastReceiveFile::load(&recv.last_receive_file));
//!
//! let engine = GapRecoveryEngine::new(config, pool, queue, sink, last);
//! engine.bootstrap()?;
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! engine.run(shutdown).await;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod last_receive;
pub mod liveness;
pub mod queue;
pub mod raw;
pub mod sink;
pub mod store;
pub mod strategy;
pub mod tracker;

pub use engine::{GapRecoveryEngine, Step};
pub use error::{RecvError, Result};
pub use last_receive::LastReceiveFile;
pub use queue::{OutageQueue, Resolution};
pub use raw::{
    parse_raw_frame, FrameEvent, FrameIntake, RawFrame, RawFrameSource, SequenceGapDetector, UdpFrameSource,
};
pub use sink::MessageSink;
pub use store::{JsonFileOutageStore, MemoryOutageStore, OutageStore};
pub use strategy::{Completion, CriteriaContext, Progress, Strategy};
pub use tracker::SequenceTracker;

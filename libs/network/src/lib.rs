//! # DDS Network Layer
//!
//! Moves LDDS frames over TCP and manages the set of upstream peers a
//! receiver pulls from.
//!
//! - [`FrameConnection`]: one framed TCP socket, used by both the server's
//!   per-client handler and the client side
//! - [`RecvConnection`]: the capability the recovery engine needs from an
//!   upstream peer; [`LddsRecvConnection`] implements it over TCP
//! - [`ConnectionPool`]: priority-ordered peers with failover, reconnect
//!   throttling and exhaustive "untried" sweeps
//! - [`ConnectionStats`]: read-only status counters for monitoring

pub mod error;
pub mod transports;

pub use error::{Result, TransportError};
pub use transports::metrics::{ConnectionState, ConnectionStats, ConnectionStatus};
pub use transports::pool::{ConnectionPool, PoolStats};
pub use transports::tcp::FrameConnection;
pub use transports::upstream::LddsRecvConnection;
pub use transports::RecvConnection;

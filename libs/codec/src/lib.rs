//! # LDDS Wire Codec
//!
//! Encoding rules for the request/response protocol spoken between DDS
//! clients and servers. Every exchange is a single frame:
//!
//! ```text
//! +------+----+-------+------------------+
//! | FAF0 | id | 00042 | body (42 bytes)  |
//! +------+----+-------+------------------+
//!   4B    1B    5B ASCII decimal length
//! ```
//!
//! A server answers a request with a frame of the same id. A body that starts
//! with `?` is a status response (`?code,errno,text`) instead of data; see
//! [`ServerStatus`].
//!
//! This crate has no I/O. `dds-network` moves frames over TCP.

pub mod auth;
pub mod block;
pub mod error;
pub mod frame;
pub mod status;

pub use auth::{authenticator, AuthHello, Hello, PROTOCOL_VERSION};
pub use block::{decode_block, BlockEncoder, MAX_BLOCK_BYTES, MAX_BLOCK_MESSAGES};
pub use error::{ProtocolError, Result};
pub use frame::{Frame, FrameHeader, MessageId, HEADER_LEN, MAX_BODY_LEN, SYNC};
pub use status::{ServerErrorCode, ServerStatus};

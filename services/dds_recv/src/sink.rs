//! Where recovered messages go

use crate::error::Result;
use dds_types::DcpMessage;

/// Destination for messages pulled from upstream, normally the local
/// archive. `source` names the connection the message came from.
pub trait MessageSink: Send + Sync {
    fn archive(&self, message: DcpMessage, source: &str) -> Result<()>;
}

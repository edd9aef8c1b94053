//! Protocol-level errors for LDDS frame processing

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// Buffer too small to contain the expected structure
    #[error("Message too small: need {need} bytes, got {got} (context: {context})")]
    MessageTooSmall {
        need: usize,
        got: usize,
        context: String,
    },

    /// Header did not start with the sync pattern
    #[error("Invalid sync: expected FAF0, got {actual:?}")]
    InvalidSync { actual: [u8; 4] },

    /// Message id byte is not part of the protocol
    #[error("Unknown message id {id:#04x}")]
    UnknownMessageId { id: u8 },

    /// Length field is not five ASCII digits
    #[error("Invalid length field {field:?}")]
    InvalidLength { field: String },

    /// Body exceeds what a five-digit length can describe
    #[error("Message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Body text did not have the expected shape
    #[error("Malformed {what} body: {reason}")]
    MalformedBody { what: &'static str, reason: String },

    /// Record payload failed to (de)serialize
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    pub fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedBody {
            what,
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for ProtocolError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

//! Server Error Types
//!
//! Every error that ends a client request maps to an LDDS status response.
//! Whether the client is also hung up on depends on the variant.

use dds_codec::{ProtocolError, ServerErrorCode, ServerStatus};
use dds_network::TransportError;
use dds_types::TypesError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    /// Uploaded criteria could not be parsed or are inconsistent
    #[error("Bad search criteria: {0}")]
    Criteria(#[from] TypesError),

    #[error("Network list '{name}' not found")]
    UnknownNetworkList { name: String },

    #[error("Unrecognized DCP name '{name}'")]
    UnknownDcpName { name: String },

    #[error("Authentication failed for '{user}': {reason}")]
    Authentication { user: String, reason: String },

    /// Request arrived before the exchange it depends on
    #[error("Request out of sequence: {message}")]
    OutOfSequence { message: String },

    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Codec error: {0}")]
    Codec(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive {
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn out_of_sequence(message: impl Into<String>) -> Self {
        Self::OutOfSequence {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ServerErrorCode {
        match self {
            Self::Criteria(TypesError::UnknownKeyword { .. }) => ServerErrorCode::BadKeyword,
            Self::Criteria(_) => ServerErrorCode::BadSearchCriteria,
            Self::UnknownNetworkList { .. } => ServerErrorCode::BadNetworkList,
            Self::UnknownDcpName { .. } => ServerErrorCode::BadDcpName,
            Self::Authentication { .. } => ServerErrorCode::AuthFailed,
            Self::OutOfSequence { .. } => ServerErrorCode::BadRequest,
            Self::Archive { .. } | Self::Io { .. } => ServerErrorCode::ArchiveIo,
            Self::Codec(_) | Self::Transport(_) => ServerErrorCode::Internal,
        }
    }

    /// Status response sent back to the client.
    pub fn status(&self) -> ServerStatus {
        ServerStatus::new(self.code(), self.to_string())
    }

    /// Whether the client connection is closed after reporting this error.
    pub fn hangup(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::Codec(_) | Self::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let err = ServerError::UnknownNetworkList {
            name: "rivers".into(),
        };
        assert_eq!(err.status().code, ServerErrorCode::BadNetworkList);
        assert!(!err.hangup());

        let err = ServerError::Authentication {
            user: "bob".into(),
            reason: "bad password".into(),
        };
        assert_eq!(err.code(), ServerErrorCode::AuthFailed);
        assert!(err.hangup());
    }

    #[test]
    fn test_unknown_keyword_maps_to_bad_keyword() {
        let err = ServerError::from(TypesError::UnknownKeyword {
            keyword: "FOO".into(),
            line: 3,
        });
        assert_eq!(err.code(), ServerErrorCode::BadKeyword);
    }
}

//! Receiver Error Types

use dds_network::TransportError;
use dds_types::TypesError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecvError {
    /// Outage violates its own invariants
    #[error("Invalid outage: {0}")]
    Outage(#[from] TypesError),

    #[error("Outage store error: {message}")]
    Store { message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Outage file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message could not be handed to the local archive
    #[error("Sink rejected message: {message}")]
    Sink { message: String },

    /// Raw frame source cannot continue
    #[error("Frame source failed: {message}")]
    FrameSource { message: String },
}

pub type Result<T> = std::result::Result<T, RecvError>;

impl RecvError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink {
            message: message.into(),
        }
    }

    pub fn frame_source(message: impl Into<String>) -> Self {
        Self::FrameSource {
            message: message.into(),
        }
    }
}

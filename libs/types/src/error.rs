//! Error types for address, criteria and list parsing

use thiserror::Error;

/// Errors raised while parsing or validating shared types
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypesError {
    /// Address is empty, too long, or contains non-hex characters
    #[error("Invalid DCP address '{input}'")]
    InvalidAddress { input: String },

    /// Unrecognized keyword in a criteria block
    #[error("Unknown criteria keyword '{keyword}' on line {line}")]
    UnknownKeyword { keyword: String, line: usize },

    /// Keyword recognized but its value did not parse
    #[error("Bad value for {keyword} on line {line}: {reason}")]
    BadValue {
        keyword: String,
        line: usize,
        reason: String,
    },

    /// Time expression did not parse
    #[error("Invalid time expression '{input}'")]
    InvalidTime { input: String },

    /// Criteria are internally inconsistent
    #[error("Inconsistent criteria: {message}")]
    Inconsistent { message: String },

    /// Outage fields violate an ordering constraint
    #[error("Invalid outage: {message}")]
    InvalidOutage { message: String },
}

/// Result type alias for shared type operations
pub type Result<T> = std::result::Result<T, TypesError>;

impl TypesError {
    pub fn bad_value(keyword: impl Into<String>, line: usize, reason: impl Into<String>) -> Self {
        Self::BadValue {
            keyword: keyword.into(),
            line,
            reason: reason.into(),
        }
    }

    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
        }
    }

    pub fn invalid_outage(message: impl Into<String>) -> Self {
        Self::InvalidOutage {
            message: message.into(),
        }
    }
}

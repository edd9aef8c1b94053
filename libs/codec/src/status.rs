//! Status responses: `?code,errno,text`

use crate::{ProtocolError, Result};
use std::fmt;

/// Server-side status codes carried in a `?` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerErrorCode {
    BadSince,
    BadUntil,
    BadNetworkList,
    BadAddress,
    /// Nothing matched within the search window. Normal "caught up".
    MsgTimeout,
    BadDapsStatus,
    BadRetransmit,
    BadChannel,
    NoSuchSource,
    BadKeyword,
    BadDcpName,
    BadSearchCriteria,
    /// The search passed the criteria's until-time.
    Until,
    ArchiveIo,
    AuthFailed,
    Internal,
    BadRequest,
    Other(u16),
}

impl ServerErrorCode {
    pub fn code(self) -> u16 {
        match self {
            Self::BadSince => 7,
            Self::BadUntil => 8,
            Self::BadNetworkList => 9,
            Self::BadAddress => 10,
            Self::MsgTimeout => 11,
            Self::BadDapsStatus => 12,
            Self::BadRetransmit => 13,
            Self::BadChannel => 14,
            Self::NoSuchSource => 15,
            Self::BadKeyword => 16,
            Self::BadDcpName => 17,
            Self::BadSearchCriteria => 18,
            Self::Until => 25,
            Self::ArchiveIo => 30,
            Self::AuthFailed => 31,
            Self::Internal => 32,
            Self::BadRequest => 33,
            Self::Other(c) => c,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            7 => Self::BadSince,
            8 => Self::BadUntil,
            9 => Self::BadNetworkList,
            10 => Self::BadAddress,
            11 => Self::MsgTimeout,
            12 => Self::BadDapsStatus,
            13 => Self::BadRetransmit,
            14 => Self::BadChannel,
            15 => Self::NoSuchSource,
            16 => Self::BadKeyword,
            17 => Self::BadDcpName,
            18 => Self::BadSearchCriteria,
            25 => Self::Until,
            30 => Self::ArchiveIo,
            31 => Self::AuthFailed,
            32 => Self::Internal,
            33 => Self::BadRequest,
            other => Self::Other(other),
        }
    }

    /// Codes a client treats as normal completion rather than failure.
    pub fn is_caught_up(self) -> bool {
        matches!(self, Self::MsgTimeout | Self::Until)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub code: ServerErrorCode,
    pub errno: i32,
    pub text: String,
}

impl ServerStatus {
    pub fn new(code: ServerErrorCode, text: impl Into<String>) -> Self {
        Self {
            code,
            errno: 0,
            text: text.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!("?{},{},{}", self.code.code(), self.errno, self.text)
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(body);
        let text = text.trim_end_matches('\0');
        let rest = text
            .strip_prefix('?')
            .ok_or_else(|| ProtocolError::malformed("status", "missing '?' prefix"))?;

        let mut parts = rest.splitn(3, ',');
        let code: u16 = parts
            .next()
            .and_then(|c| c.trim().parse().ok())
            .ok_or_else(|| ProtocolError::malformed("status", format!("bad code in {:?}", text)))?;
        let errno: i32 = parts
            .next()
            .and_then(|e| e.trim().parse().ok())
            .unwrap_or(0);
        let message = parts.next().unwrap_or("").to_string();

        Ok(Self {
            code: ServerErrorCode::from_code(code),
            errno,
            text: message,
        })
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self.code, self.code.code(), self.text)
    }
}

//! Hello and authenticated hello bodies
//!
//! Anonymous hello: `user version`. Authenticated hello:
//! `user timestamp authenticator version`, where the authenticator is the hex
//! SHA3-256 digest of user, password and timestamp concatenated.

use crate::{ProtocolError, Result};
use chrono::{DateTime, Utc};
use sha3::{Digest, Sha3_256};

/// Protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u32 = 14;

const AUTH_TIME_FORMAT: &str = "%y%j%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub user: String,
    pub version: u32,
}

impl Hello {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            version: PROTOCOL_VERSION,
        }
    }

    pub fn encode(&self) -> String {
        format!("{} {}", self.user, self.version)
    }

    /// Legacy clients omit the version; they are treated as version 0.
    pub fn parse(body: &str) -> Result<Self> {
        let mut toks = body.split_whitespace();
        let user = toks
            .next()
            .ok_or_else(|| ProtocolError::malformed("hello", "missing user name"))?;
        let version = match toks.next() {
            Some(v) => v
                .parse()
                .map_err(|_| ProtocolError::malformed("hello", format!("bad version {:?}", v)))?,
            None => 0,
        };
        Ok(Self {
            user: user.to_string(),
            version,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHello {
    pub user: String,
    pub timestamp: String,
    pub authenticator: String,
    pub version: u32,
}

impl AuthHello {
    pub fn sign(user: &str, password: &str, at: DateTime<Utc>) -> Self {
        let timestamp = at.format(AUTH_TIME_FORMAT).to_string();
        Self {
            user: user.to_string(),
            authenticator: authenticator(user, password, &timestamp),
            timestamp,
            version: PROTOCOL_VERSION,
        }
    }

    pub fn verify(&self, password: &str) -> bool {
        authenticator(&self.user, password, &self.timestamp).eq_ignore_ascii_case(&self.authenticator)
    }

    pub fn encode(&self) -> String {
        format!(
            "{} {} {} {}",
            self.user, self.timestamp, self.authenticator, self.version
        )
    }

    pub fn parse(body: &str) -> Result<Self> {
        let toks: Vec<&str> = body.split_whitespace().collect();
        if toks.len() < 3 {
            return Err(ProtocolError::malformed(
                "auth hello",
                format!("expected 3 or 4 fields, got {}", toks.len()),
            ));
        }
        let version = match toks.get(3) {
            Some(v) => v
                .parse()
                .map_err(|_| ProtocolError::malformed("auth hello", format!("bad version {:?}", v)))?,
            None => 0,
        };
        Ok(Self {
            user: toks[0].to_string(),
            timestamp: toks[1].to_string(),
            authenticator: toks[2].to_string(),
            version,
        })
    }
}

pub fn authenticator(user: &str, password: &str, timestamp: &str) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(user.as_bytes());
    hasher.update(password.as_bytes());
    hasher.update(timestamp.as_bytes());
    hex::encode(hasher.finalize())
}

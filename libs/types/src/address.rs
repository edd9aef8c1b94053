//! DCP platform addresses

use crate::{Result, TypesError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 32-bit platform identifier, written as up to 8 hex digits.
///
/// Parsing is case-insensitive; display is always 8 upper-case digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DcpAddress(u32);

impl DcpAddress {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }
}

impl FromStr for DcpAddress {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.len() > 8 {
            return Err(TypesError::InvalidAddress {
                input: s.to_string(),
            });
        }
        u32::from_str_radix(trimmed, 16)
            .map(Self)
            .map_err(|_| TypesError::InvalidAddress {
                input: s.to_string(),
            })
    }
}

impl fmt::Display for DcpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl From<u32> for DcpAddress {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

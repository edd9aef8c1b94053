//! DCP messages and their index entries
//!
//! A [`DcpMessage`] is the archived payload plus the metadata the archive
//! indexes. [`IndexEntry`] is the lightweight projection a search filter
//! evaluates before the payload is ever read.

use crate::DcpAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a message entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    Goes,
    GoesSelfTimed,
    GoesRandom,
    NetDcp,
    Iridium,
    Lrit,
    Drgs,
    Dds,
    Other,
}

impl SourceType {
    pub const ALL: [SourceType; 9] = [
        SourceType::Goes,
        SourceType::GoesSelfTimed,
        SourceType::GoesRandom,
        SourceType::NetDcp,
        SourceType::Iridium,
        SourceType::Lrit,
        SourceType::Drgs,
        SourceType::Dds,
        SourceType::Other,
    ];

    /// GOES transmissions carry a DAPS quality code.
    pub fn is_quality_checked(self) -> bool {
        matches!(
            self,
            SourceType::Goes | SourceType::GoesSelfTimed | SourceType::GoesRandom
        )
    }

    /// Short-burst satellite data, hidden from old protocol clients.
    pub fn is_satellite_burst(self) -> bool {
        matches!(self, SourceType::Iridium)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            SourceType::Goes => "GOES",
            SourceType::GoesSelfTimed => "GOES_SELFTIMED",
            SourceType::GoesRandom => "GOES_RANDOM",
            SourceType::NetDcp => "NETDCP",
            SourceType::Iridium => "IRIDIUM",
            SourceType::Lrit => "LRIT",
            SourceType::Drgs => "DRGS",
            SourceType::Dds => "DDS",
            SourceType::Other => "OTHER",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.keyword().eq_ignore_ascii_case(keyword))
    }

    /// Whether a message of type `self` satisfies a criteria entry naming `wanted`.
    ///
    /// Plain `GOES` in criteria covers both self-timed and random transmissions.
    pub fn satisfies(self, wanted: SourceType) -> bool {
        self == wanted || (wanted == SourceType::Goes && self.is_quality_checked())
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaudRate {
    Unknown,
    B100,
    B300,
    B1200,
}

impl BaudRate {
    pub fn from_bps(bps: u32) -> Self {
        match bps {
            100 => BaudRate::B100,
            300 => BaudRate::B300,
            1200 => BaudRate::B1200,
            _ => BaudRate::Unknown,
        }
    }

    pub fn bps(self) -> Option<u32> {
        match self {
            BaudRate::B100 => Some(100),
            BaudRate::B300 => Some(300),
            BaudRate::B1200 => Some(1200),
            BaudRate::Unknown => None,
        }
    }
}

/// Single-character quality / DAPS status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailureCode(pub char);

impl FailureCode {
    pub const GOOD: FailureCode = FailureCode('G');
    pub const PARITY: FailureCode = FailureCode('?');

    /// `G` and `?` are transmissions from a platform. Everything else is a
    /// DAPS status message generated about one.
    pub fn is_real_message(self) -> bool {
        self == Self::GOOD || self == Self::PARITY
    }

    pub fn is_good(self) -> bool {
        self == Self::GOOD
    }
}

impl Default for FailureCode {
    fn default() -> Self {
        Self::GOOD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    pub source: SourceType,
    pub baud: BaudRate,
    pub retransmitted: bool,
    pub failure_code: FailureCode,
}

impl MessageFlags {
    pub fn new(source: SourceType) -> Self {
        Self {
            source,
            baud: BaudRate::Unknown,
            retransmitted: false,
            failure_code: FailureCode::GOOD,
        }
    }

    /// Bad quality only means something for sources that report quality.
    pub fn is_quality_bad(&self) -> bool {
        self.source.is_quality_checked() && !self.failure_code.is_good()
    }
}

/// An archived DCP message. Never mutated after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcpMessage {
    pub address: DcpAddress,
    pub flags: MessageFlags,
    pub receive_time: DateTime<Utc>,
    pub transmit_time: Option<DateTime<Utc>>,
    pub carrier_start: Option<DateTime<Utc>>,
    pub carrier_stop: Option<DateTime<Utc>>,
    pub channel: Option<u16>,
    pub sequence_num: Option<u16>,
    pub data: Vec<u8>,
}

impl DcpMessage {
    pub fn new(address: DcpAddress, source: SourceType, receive_time: DateTime<Utc>, data: Vec<u8>) -> Self {
        Self {
            address,
            flags: MessageFlags::new(source),
            receive_time,
            transmit_time: None,
            carrier_start: None,
            carrier_stop: None,
            channel: None,
            sequence_num: None,
            data,
        }
    }

    pub fn with_channel(mut self, channel: u16) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_sequence(mut self, seq: u16) -> Self {
        self.sequence_num = Some(seq);
        self
    }

    pub fn with_failure_code(mut self, code: char) -> Self {
        self.flags.failure_code = FailureCode(code);
        self
    }

    pub fn with_baud(mut self, baud: BaudRate) -> Self {
        self.flags.baud = baud;
        self
    }

    pub fn with_transmit_time(mut self, t: DateTime<Utc>) -> Self {
        self.transmit_time = Some(t);
        self
    }

    pub fn is_real_message(&self) -> bool {
        self.flags.failure_code.is_real_message()
    }

    /// Index projection used by the archive; `location` is opaque to everyone else.
    pub fn index_entry(&self, location: u64) -> IndexEntry {
        IndexEntry {
            receive_time: self.receive_time,
            transmit_time: self.transmit_time,
            address: self.address,
            channel: self.channel,
            sequence_num: self.sequence_num,
            flags: self.flags,
            location,
        }
    }
}

/// Lightweight reference to an archived message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub receive_time: DateTime<Utc>,
    pub transmit_time: Option<DateTime<Utc>>,
    pub address: DcpAddress,
    pub channel: Option<u16>,
    pub sequence_num: Option<u16>,
    pub flags: MessageFlags,
    pub location: u64,
}

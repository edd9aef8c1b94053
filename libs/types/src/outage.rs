//! Outages: detected gaps in the real-time receive path
//!
//! An outage is registered by whatever input notices a discontinuity, queued
//! in a persistent store, claimed by the recovery engine and finally marked
//! recovered (deleted), partial or failed.

use crate::{DcpAddress, Result, TypesError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Assigned by the outage store; 0 means "not yet stored".
pub type OutageId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutageStatus {
    Active,
    Partial,
    Recovered,
    Failed,
}

impl fmt::Display for OutageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutageStatus::Active => "active",
            OutageStatus::Partial => "partial",
            OutageStatus::Recovered => "recovered",
            OutageStatus::Failed => "failed",
        })
    }
}

/// One variant per kind of gap, each holding only what that kind needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutageKind {
    /// Whole-system downtime, e.g. the process was not running.
    System {
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// Perpetual real-time intake when no local satellite link exists.
    RealTime { begin: DateTime<Utc> },
    /// A receive interface lost specific channels.
    Channel {
        channels: Vec<u16>,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// A single platform's message went missing.
    Address {
        address: DcpAddress,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// A run of satellite-stream sequence numbers went missing.
    Sequence { begin: u16, end: u16 },
}

impl OutageKind {
    /// Lower rank is recovered first.
    pub fn rank(&self) -> u8 {
        match self {
            OutageKind::System { .. } => 0,
            OutageKind::Sequence { .. } => 1,
            OutageKind::Address { .. } => 2,
            OutageKind::Channel { .. } => 3,
            OutageKind::RealTime { .. } => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutageKind::System { .. } => "system",
            OutageKind::RealTime { .. } => "real-time",
            OutageKind::Channel { .. } => "channel",
            OutageKind::Address { .. } => "address",
            OutageKind::Sequence { .. } => "sequence",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outage {
    pub id: OutageId,
    pub source: String,
    pub kind: OutageKind,
    pub status: OutageStatus,
    pub registered_at: DateTime<Utc>,
}

impl Outage {
    fn new(source: impl Into<String>, kind: OutageKind) -> Self {
        Self {
            id: 0,
            source: source.into(),
            kind,
            status: OutageStatus::Active,
            registered_at: Utc::now(),
        }
    }

    pub fn system(begin: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        check_times(begin, end)?;
        Ok(Self::new("system", OutageKind::System { begin, end }))
    }

    pub fn real_time(begin: DateTime<Utc>) -> Self {
        Self::new("real-time", OutageKind::RealTime { begin })
    }

    pub fn channel(
        source: impl Into<String>,
        channels: Vec<u16>,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self> {
        check_times(begin, end)?;
        if channels.is_empty() {
            return Err(TypesError::invalid_outage("channel outage needs at least one channel"));
        }
        Ok(Self::new(source, OutageKind::Channel { channels, begin, end }))
    }

    pub fn address(
        address: DcpAddress,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self> {
        check_times(begin, end)?;
        Ok(Self::new("address", OutageKind::Address { address, begin, end }))
    }

    pub fn sequence(source: impl Into<String>, begin: u16, end: u16) -> Result<Self> {
        if begin > end {
            return Err(TypesError::invalid_outage(format!(
                "sequence begin {} is after end {}",
                begin, end
            )));
        }
        Ok(Self::new(source, OutageKind::Sequence { begin, end }))
    }

    /// Registers a missing run that may wrap past the top of the 16-bit
    /// sequence space. A wrapped run becomes two outages, never one with
    /// begin > end.
    pub fn sequence_wrapping(source: &str, begin: u16, end: u16) -> Vec<Self> {
        if begin <= end {
            vec![Self::new(source, OutageKind::Sequence { begin, end })]
        } else {
            vec![
                Self::new(source, OutageKind::Sequence { begin, end: u16::MAX }),
                Self::new(source, OutageKind::Sequence { begin: 0, end }),
            ]
        }
    }

    /// Start time for time-ranged kinds.
    pub fn begin_time(&self) -> Option<DateTime<Utc>> {
        match &self.kind {
            OutageKind::System { begin, .. }
            | OutageKind::RealTime { begin }
            | OutageKind::Channel { begin, .. }
            | OutageKind::Address { begin, .. } => Some(*begin),
            OutageKind::Sequence { .. } => None,
        }
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        match &self.kind {
            OutageKind::System { end, .. }
            | OutageKind::Channel { end, .. }
            | OutageKind::Address { end, .. } => Some(*end),
            OutageKind::RealTime { .. } | OutageKind::Sequence { .. } => None,
        }
    }

    /// Moves the begin time of a time-ranged outage forward. Never moves it
    /// backward and never past the end time.
    pub fn advance_begin(&mut self, to: DateTime<Utc>) -> bool {
        let end = self.end_time();
        let begin = match &mut self.kind {
            OutageKind::System { begin, .. }
            | OutageKind::RealTime { begin }
            | OutageKind::Channel { begin, .. }
            | OutageKind::Address { begin, .. } => begin,
            OutageKind::Sequence { .. } => return false,
        };
        let to = match end {
            Some(end) if to > end => end,
            _ => to,
        };
        if to > *begin {
            *begin = to;
            true
        } else {
            false
        }
    }

    pub fn sequence_range(&self) -> Option<(u16, u16)> {
        match self.kind {
            OutageKind::Sequence { begin, end } => Some((begin, end)),
            _ => None,
        }
    }

    /// Narrows a sequence outage to a sub-range of itself.
    pub fn narrow_sequence(&mut self, new_begin: u16, new_end: u16) -> Result<()> {
        match &mut self.kind {
            OutageKind::Sequence { begin, end } => {
                if new_begin > new_end || new_begin < *begin || new_end > *end {
                    return Err(TypesError::invalid_outage(format!(
                        "cannot narrow {}..={} to {}..={}",
                        begin, end, new_begin, new_end
                    )));
                }
                *begin = new_begin;
                *end = new_end;
                Ok(())
            }
            _ => Err(TypesError::invalid_outage("only sequence outages can be narrowed")),
        }
    }

    /// Checks the begin <= end invariant.
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            OutageKind::Sequence { begin, end } if begin > end => Err(TypesError::invalid_outage(
                format!("sequence begin {} is after end {}", begin, end),
            )),
            OutageKind::System { begin, end }
            | OutageKind::Channel { begin, end, .. }
            | OutageKind::Address { begin, end, .. } => check_times(*begin, *end),
            _ => Ok(()),
        }
    }

    /// Total order used to pick the next outage to work.
    ///
    /// Active before anything else, then by kind rank, then oldest first,
    /// then by id.
    pub fn priority_cmp(&self, other: &Outage) -> Ordering {
        let active = |o: &Outage| if o.status == OutageStatus::Active { 0u8 } else { 1 };
        active(self)
            .cmp(&active(other))
            .then_with(|| self.kind.rank().cmp(&other.kind.rank()))
            .then_with(|| self.sort_time().cmp(&other.sort_time()))
            .then_with(|| self.id.cmp(&other.id))
    }

    fn sort_time(&self) -> DateTime<Utc> {
        self.begin_time().unwrap_or(self.registered_at)
    }
}

fn check_times(begin: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if begin > end {
        return Err(TypesError::invalid_outage(format!(
            "begin {} is after end {}",
            begin, end
        )));
    }
    Ok(())
}

impl fmt::Display for Outage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} outage #{} ", self.kind.name(), self.id)?;
        match &self.kind {
            OutageKind::System { begin, end } => write!(f, "[{} .. {}]", begin, end)?,
            OutageKind::RealTime { begin } => write!(f, "[{} ..]", begin)?,
            OutageKind::Channel { channels, begin, end } => {
                write!(f, "chan {:?} [{} .. {}]", channels, begin, end)?
            }
            OutageKind::Address { address, begin, end } => {
                write!(f, "{} [{} .. {}]", address, begin, end)?
            }
            OutageKind::Sequence { begin, end } => write!(f, "seq [{} .. {}]", begin, end)?,
        }
        write!(f, " {}", self.status)
    }
}

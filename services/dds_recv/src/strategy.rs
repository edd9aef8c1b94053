//! Per-kind recovery strategies
//!
//! Each [`OutageKind`] maps to one static [`Strategy`]: how to phrase the
//! search criteria for it, and what "caught up" or "every peer tried" means
//! for its status.

use crate::error::Result;
use crate::tracker::SequenceTracker;
use chrono::{DateTime, Duration, Utc};
use dds_types::{ChannelToken, Outage, OutageKind, OutageStatus, SearchCriteria, SequenceRange, TimeSpec};

/// How far past now the real-time intake asks for data.
const REAL_TIME_HORIZON_DAYS: i64 = 2 * 365;

/// Inputs a criteria builder needs besides the outage itself
pub struct CriteriaContext<'a> {
    /// Network lists associated with the receive group
    pub netlists: &'a [String],
    pub now: DateTime<Utc>,
}

/// Counters for the claim being worked
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress<'a> {
    /// Messages with a good or parity-error failure code
    pub real_messages: u64,
    pub total_messages: u64,
    pub tracker: Option<&'a SequenceTracker>,
}

/// What the engine should do once the current peer has nothing more
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Release the claim with this status.
    Resolve(OutageStatus),
    /// Move to a peer not yet tried for this outage.
    NextConnection,
    /// Keep the claim and poll again later.
    Wait,
}

pub struct Strategy {
    pub name: &'static str,
    pub build_criteria: fn(&Outage, &CriteriaContext<'_>) -> Result<SearchCriteria>,
    pub on_caught_up: fn(&Progress<'_>) -> Completion,
    /// Status once every peer has been tried. Only consulted by sweeping
    /// strategies.
    pub on_exhausted: fn(&Progress<'_>) -> OutageStatus,
    /// Whether the begin time follows the data as it arrives.
    pub drags_watermark: bool,
    /// Whether every peer is tried once instead of sticking to the current one.
    pub sweeps_connections: bool,
}

impl Strategy {
    pub fn for_kind(kind: &OutageKind) -> &'static Strategy {
        match kind {
            OutageKind::System { .. } => &SYSTEM,
            OutageKind::RealTime { .. } => &REAL_TIME,
            OutageKind::Channel { .. } => &CHANNEL,
            OutageKind::Address { .. } => &ADDRESS,
            OutageKind::Sequence { .. } => &SEQUENCE,
        }
    }
}

static SYSTEM: Strategy = Strategy {
    name: "system",
    build_criteria: system_criteria,
    on_caught_up: |_| Completion::Resolve(OutageStatus::Recovered),
    on_exhausted: exhausted_by_count,
    drags_watermark: true,
    sweeps_connections: false,
};

static REAL_TIME: Strategy = Strategy {
    name: "real-time",
    build_criteria: real_time_criteria,
    on_caught_up: |_| Completion::Wait,
    on_exhausted: |_| OutageStatus::Active,
    drags_watermark: true,
    sweeps_connections: false,
};

static CHANNEL: Strategy = Strategy {
    name: "channel",
    build_criteria: channel_criteria,
    on_caught_up: |_| Completion::Resolve(OutageStatus::Recovered),
    on_exhausted: exhausted_by_count,
    drags_watermark: true,
    sweeps_connections: false,
};

static ADDRESS: Strategy = Strategy {
    name: "address",
    build_criteria: address_criteria,
    on_caught_up: |p| {
        if p.real_messages > 0 {
            Completion::Resolve(OutageStatus::Recovered)
        } else {
            Completion::Resolve(OutageStatus::Failed)
        }
    },
    on_exhausted: exhausted_by_count,
    drags_watermark: false,
    sweeps_connections: false,
};

static SEQUENCE: Strategy = Strategy {
    name: "sequence",
    build_criteria: sequence_criteria,
    on_caught_up: |p| match p.tracker {
        Some(t) if t.is_complete() => Completion::Resolve(OutageStatus::Recovered),
        _ => Completion::NextConnection,
    },
    on_exhausted: |p| match p.tracker {
        Some(t) if t.is_complete() => OutageStatus::Recovered,
        Some(t) if t.received() > 0 => OutageStatus::Partial,
        _ => OutageStatus::Failed,
    },
    drags_watermark: false,
    sweeps_connections: true,
};

fn exhausted_by_count(p: &Progress<'_>) -> OutageStatus {
    if p.total_messages > 0 {
        OutageStatus::Partial
    } else {
        OutageStatus::Failed
    }
}

/// Since/until from the outage's own time bounds.
fn time_window(outage: &Outage) -> SearchCriteria {
    let mut criteria = SearchCriteria::new();
    criteria.lrgs_since = outage.begin_time().map(TimeSpec::Absolute);
    criteria.lrgs_until = outage.end_time().map(TimeSpec::Absolute);
    criteria
}

fn system_criteria(outage: &Outage, ctx: &CriteriaContext<'_>) -> Result<SearchCriteria> {
    let mut criteria = time_window(outage);
    criteria.network_lists = ctx.netlists.to_vec();
    Ok(criteria)
}

fn real_time_criteria(outage: &Outage, ctx: &CriteriaContext<'_>) -> Result<SearchCriteria> {
    let mut criteria = time_window(outage);
    let horizon = TimeSpec::Absolute(ctx.now + Duration::days(REAL_TIME_HORIZON_DAYS));
    criteria.lrgs_until = Some(horizon);
    criteria.daps_until = Some(horizon);
    criteria.network_lists = ctx.netlists.to_vec();
    Ok(criteria)
}

fn channel_criteria(outage: &Outage, ctx: &CriteriaContext<'_>) -> Result<SearchCriteria> {
    let mut criteria = time_window(outage);
    if let OutageKind::Channel { channels, .. } = &outage.kind {
        for &channel in channels {
            criteria.add_channel_token(ChannelToken::and(channel));
        }
    }
    criteria.network_lists = ctx.netlists.to_vec();
    Ok(criteria)
}

fn address_criteria(outage: &Outage, _ctx: &CriteriaContext<'_>) -> Result<SearchCriteria> {
    let mut criteria = time_window(outage);
    if let OutageKind::Address { address, .. } = &outage.kind {
        criteria.addresses.insert(*address);
    }
    Ok(criteria)
}

fn sequence_criteria(outage: &Outage, _ctx: &CriteriaContext<'_>) -> Result<SearchCriteria> {
    let mut criteria = SearchCriteria::new();
    if let Some((begin, end)) = outage.sequence_range() {
        criteria.sequence = Some(SequenceRange::new(begin, end)?);
    }
    Ok(criteria)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dds_types::DcpAddress;

    fn ctx(netlists: &[String]) -> CriteriaContext<'_> {
        CriteriaContext {
            netlists,
            now: Utc::now(),
        }
    }

    #[test]
    fn test_system_criteria_carries_window_and_netlists() {
        let now = Utc::now();
        let outage = Outage::system(now - Duration::hours(2), now).unwrap();
        let lists = vec!["goes-east".to_string()];
        let c = (Strategy::for_kind(&outage.kind).build_criteria)(&outage, &ctx(&lists)).unwrap();
        assert_eq!(c.lrgs_since, Some(TimeSpec::Absolute(now - Duration::hours(2))));
        assert_eq!(c.lrgs_until, Some(TimeSpec::Absolute(now)));
        assert_eq!(c.network_lists, lists);
    }

    #[test]
    fn test_real_time_until_is_far_future() {
        let outage = Outage::real_time(Utc::now());
        let context = ctx(&[]);
        let c = (REAL_TIME.build_criteria)(&outage, &context).unwrap();
        let horizon = TimeSpec::Absolute(context.now + Duration::days(REAL_TIME_HORIZON_DAYS));
        assert_eq!(c.lrgs_until, Some(horizon));
        assert_eq!(c.daps_until, Some(horizon));
        assert_eq!((REAL_TIME.on_caught_up)(&Progress::default()), Completion::Wait);
    }

    #[test]
    fn test_channel_criteria_uses_and_tokens() {
        let now = Utc::now();
        let outage = Outage::channel("drgs-1", vec![12, 14], now - Duration::hours(1), now).unwrap();
        let c = (CHANNEL.build_criteria)(&outage, &ctx(&[])).unwrap();
        assert_eq!(c.channels, vec![ChannelToken::and(12), ChannelToken::and(14)]);
    }

    #[test]
    fn test_address_completion_needs_a_real_message() {
        let now = Utc::now();
        let addr = DcpAddress::new(0xCE1234A6);
        let outage = Outage::address(addr, now - Duration::hours(1), now).unwrap();
        let c = (ADDRESS.build_criteria)(&outage, &ctx(&["ignored".into()])).unwrap();
        assert!(c.addresses.contains(&addr));
        assert!(c.network_lists.is_empty());

        let none = Progress { total_messages: 3, ..Default::default() };
        assert_eq!((ADDRESS.on_caught_up)(&none), Completion::Resolve(OutageStatus::Failed));
        let some = Progress { real_messages: 1, total_messages: 3, tracker: None };
        assert_eq!((ADDRESS.on_caught_up)(&some), Completion::Resolve(OutageStatus::Recovered));
    }

    #[test]
    fn test_sequence_completion_follows_tracker() {
        let outage = Outage::sequence("domsat", 1000, 1010).unwrap();
        let c = (SEQUENCE.build_criteria)(&outage, &ctx(&[])).unwrap();
        assert_eq!(c.sequence, Some(SequenceRange::new(1000, 1010).unwrap()));
        assert!(c.lrgs_since.is_none());

        fn progress(tracker: &SequenceTracker) -> Progress<'_> {
            Progress {
                tracker: Some(tracker),
                ..Default::default()
            }
        }

        let mut tracker = SequenceTracker::new(1000, 1010);
        assert_eq!((SEQUENCE.on_exhausted)(&progress(&tracker)), OutageStatus::Failed);

        tracker.mark(1003);
        assert_eq!((SEQUENCE.on_caught_up)(&progress(&tracker)), Completion::NextConnection);
        assert_eq!((SEQUENCE.on_exhausted)(&progress(&tracker)), OutageStatus::Partial);

        for seq in 1000..=1010 {
            tracker.mark(seq);
        }
        assert_eq!(
            (SEQUENCE.on_caught_up)(&progress(&tracker)),
            Completion::Resolve(OutageStatus::Recovered)
        );
    }
}

//! # Search Filter
//!
//! Decides whether one archive index entry satisfies a client's criteria.
//! Checks run cheapest first and stop at the first failure:
//!
//! 1. receive-time bounds
//! 2. protocol version gate (old clients never see satellite-burst messages)
//! 3. quality gate (`good_only` users skip bad GOES messages)
//! 4. address, channel, source, DAPS and sequence matching
//!
//! Times in the criteria are resolved once, when the filter is built, so a
//! relative `now - 1 hour` does not drift while a session runs.

use chrono::{DateTime, Utc};
use dds_types::criteria::Spacecraft;
use dds_types::{DcpAddress, IndexEntry, SearchCriteria};
use std::collections::BTreeSet;

/// Clients older than this never receive satellite-burst messages.
pub const MIN_BURST_PROTOCOL_VERSION: u32 = 10;

/// Per-user settings that shape a filter beyond the uploaded criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOptions {
    pub protocol_version: u32,
    pub good_only: bool,
    pub force_ascending: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            protocol_version: dds_codec::PROTOCOL_VERSION,
            good_only: false,
            force_ascending: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchFilter {
    criteria: SearchCriteria,
    options: FilterOptions,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    daps_since: Option<DateTime<Utc>>,
    daps_until: Option<DateTime<Utc>>,
    /// Explicit addresses plus everything resolved from lists and names.
    addresses: BTreeSet<DcpAddress>,
}

impl SearchFilter {
    pub fn new(criteria: SearchCriteria, options: FilterOptions) -> Self {
        Self::resolve(criteria, options, Utc::now(), None)
    }

    /// Builds a filter with time expressions resolved against `now`.
    /// `last` is the client's saved receive time, used by `LRGS_SINCE: last`.
    pub fn resolve(
        criteria: SearchCriteria,
        options: FilterOptions,
        now: DateTime<Utc>,
        last: Option<DateTime<Utc>>,
    ) -> Self {
        let since = criteria.lrgs_since.map(|t| t.resolve(now, last));
        let until = criteria.lrgs_until.map(|t| t.resolve(now, last));
        let daps_since = criteria.daps_since.map(|t| t.resolve(now, last));
        let daps_until = criteria.daps_until.map(|t| t.resolve(now, last));
        let addresses = criteria.addresses.clone();

        Self {
            criteria,
            options,
            since,
            until,
            daps_since,
            daps_until,
            addresses,
        }
    }

    /// Adds addresses resolved from network lists or DCP names.
    pub fn add_addresses(&mut self, addresses: impl IntoIterator<Item = DcpAddress>) {
        self.addresses.extend(addresses);
    }

    pub fn criteria(&self) -> &SearchCriteria {
        &self.criteria
    }

    pub fn options(&self) -> FilterOptions {
        self.options
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.since
    }

    pub fn until(&self) -> Option<DateTime<Utc>> {
        self.until
    }

    pub fn addresses(&self) -> &BTreeSet<DcpAddress> {
        &self.addresses
    }

    /// Forward index scan only, either because the user is configured that
    /// way or because the criteria asked for ascending time order.
    pub fn force_ascending(&self) -> bool {
        self.options.force_ascending || self.criteria.ascending_time_only
    }

    pub fn realtime_settling_delay(&self) -> bool {
        self.criteria.realtime_settling_delay
    }

    pub fn passes(&self, entry: &IndexEntry) -> bool {
        if let Some(since) = self.since {
            if entry.receive_time < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.receive_time > until {
                return false;
            }
        }

        if self.options.protocol_version < MIN_BURST_PROTOCOL_VERSION
            && entry.flags.source.is_satellite_burst()
        {
            return false;
        }

        if self.options.good_only && entry.flags.is_quality_bad() {
            return false;
        }

        self.matches_base(entry)
    }

    fn matches_base(&self, entry: &IndexEntry) -> bool {
        let c = &self.criteria;

        if !c.sources.is_empty() && !c.sources.iter().any(|&s| entry.flags.source.satisfies(s)) {
            return false;
        }

        let check_addresses = !self.addresses.is_empty();
        let address_passes = !check_addresses || self.addresses.contains(&entry.address);

        if c.channels.is_empty() {
            if !address_passes {
                return false;
            }
        } else {
            let mut channel_passes = false;
            let no_ands = c.channels.iter().all(|t| !t.and);
            for token in &c.channels {
                if entry.channel != Some(token.channel) {
                    continue;
                }
                if token.and && !address_passes {
                    return false;
                }
                channel_passes = true;
                break;
            }
            if !(channel_passes || (no_ands && address_passes && check_addresses)) {
                return false;
            }
        }

        if self.daps_since.is_some() || self.daps_until.is_some() {
            let Some(xmit) = entry.transmit_time else {
                return false;
            };
            if self.daps_since.is_some_and(|t| xmit < t) || self.daps_until.is_some_and(|t| xmit > t) {
                return false;
            }
        }

        if let Some(mode) = c.retransmitted {
            if !mode.admits(entry.flags.retransmitted) {
                return false;
            }
        }

        if let Some(mode) = c.daps_status {
            if !mode.admits(!entry.flags.failure_code.is_real_message()) {
                return false;
            }
        }

        if let (Some(craft), Some(channel)) = (c.spacecraft, entry.channel) {
            let east = channel % 2 == 1;
            if (craft == Spacecraft::East) != east {
                return false;
            }
        }

        if let Some(range) = c.sequence {
            match entry.sequence_num {
                Some(seq) if range.contains(seq) => {}
                _ => return false,
            }
        }

        if !c.baud_rates.is_empty()
            && entry.flags.baud.bps().is_some()
            && !c.baud_rates.contains(&entry.flags.baud)
        {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use dds_types::{BaudRate, ChannelToken, DapsStatusMode, DcpMessage, SourceType, TimeSpec};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn message(addr: u32, source: SourceType, at: DateTime<Utc>) -> DcpMessage {
        DcpMessage::new(DcpAddress::new(addr), source, at, b"x".to_vec())
    }

    fn entry(addr: u32, source: SourceType, at: DateTime<Utc>) -> IndexEntry {
        message(addr, source, at).index_entry(0)
    }

    fn window(since: DateTime<Utc>, until: Option<DateTime<Utc>>) -> SearchCriteria {
        let mut c = SearchCriteria::new();
        c.lrgs_since = Some(TimeSpec::Absolute(since));
        c.lrgs_until = until.map(TimeSpec::Absolute);
        c
    }

    #[test]
    fn test_time_bounds_are_inclusive() {
        let filter = SearchFilter::new(window(t0(), Some(t0() + Duration::hours(1))), FilterOptions::default());
        assert!(filter.passes(&entry(1, SourceType::GoesSelfTimed, t0())));
        assert!(filter.passes(&entry(1, SourceType::GoesSelfTimed, t0() + Duration::hours(1))));
        assert!(!filter.passes(&entry(1, SourceType::GoesSelfTimed, t0() - Duration::seconds(1))));
        assert!(!filter.passes(&entry(1, SourceType::GoesSelfTimed, t0() + Duration::minutes(61))));
    }

    #[test]
    fn test_relative_since_resolves_once() {
        let criteria = SearchCriteria::parse("LRGS_SINCE: now - 1 hour\n").unwrap();
        let filter = SearchFilter::resolve(criteria, FilterOptions::default(), t0(), None);
        assert_eq!(filter.since(), Some(t0() - Duration::hours(1)));
        assert_eq!(filter.until(), None);
    }

    #[test]
    fn test_last_uses_saved_receive_time() {
        let criteria = SearchCriteria::parse("LRGS_SINCE: last\n").unwrap();
        let saved = t0() - Duration::minutes(5);
        let filter = SearchFilter::resolve(criteria, FilterOptions::default(), t0(), Some(saved));
        assert_eq!(filter.since(), Some(saved));
    }

    #[test]
    fn test_old_clients_never_see_burst_messages() {
        let options = FilterOptions {
            protocol_version: MIN_BURST_PROTOCOL_VERSION - 1,
            ..FilterOptions::default()
        };
        let filter = SearchFilter::new(SearchCriteria::new(), options);
        assert!(!filter.passes(&entry(1, SourceType::Iridium, t0())));
        assert!(filter.passes(&entry(1, SourceType::GoesSelfTimed, t0())));

        let current = SearchFilter::new(SearchCriteria::new(), FilterOptions::default());
        assert!(current.passes(&entry(1, SourceType::Iridium, t0())));
    }

    #[test]
    fn test_good_only_suppresses_bad_goes_only() {
        let options = FilterOptions {
            good_only: true,
            ..FilterOptions::default()
        };
        let filter = SearchFilter::new(SearchCriteria::new(), options);

        let mut bad_goes = entry(1, SourceType::GoesRandom, t0());
        bad_goes.flags.failure_code = dds_types::FailureCode::PARITY;
        assert!(!filter.passes(&bad_goes));

        let mut bad_netdcp = entry(1, SourceType::NetDcp, t0());
        bad_netdcp.flags.failure_code = dds_types::FailureCode::PARITY;
        assert!(filter.passes(&bad_netdcp));
    }

    #[test]
    fn test_address_set_includes_resolved_lists() {
        let mut criteria = SearchCriteria::new();
        criteria.addresses.insert(DcpAddress::new(0xCE1234A6));
        let mut filter = SearchFilter::new(criteria, FilterOptions::default());
        assert!(!filter.passes(&entry(0x11, SourceType::Goes, t0())));

        filter.add_addresses([DcpAddress::new(0x11)]);
        assert!(filter.passes(&entry(0x11, SourceType::Goes, t0())));
        assert!(filter.passes(&entry(0xCE1234A6, SourceType::Goes, t0())));
        assert!(!filter.passes(&entry(0x12, SourceType::Goes, t0())));
    }

    #[test]
    fn test_channel_tokens() {
        let mut criteria = SearchCriteria::new();
        criteria.addresses.insert(DcpAddress::new(1));
        criteria.channels.push(ChannelToken::or(7));
        let filter = SearchFilter::new(criteria.clone(), FilterOptions::default());

        // OR: channel alone passes, address alone passes when no ANDs exist
        assert!(filter.passes(&message(2, SourceType::Goes, t0()).with_channel(7).index_entry(0)));
        assert!(filter.passes(&message(1, SourceType::Goes, t0()).with_channel(9).index_entry(0)));
        assert!(!filter.passes(&message(2, SourceType::Goes, t0()).with_channel(9).index_entry(0)));

        // AND: channel and address must both match
        criteria.channels = vec![ChannelToken::and(7)];
        let filter = SearchFilter::new(criteria, FilterOptions::default());
        assert!(filter.passes(&message(1, SourceType::Goes, t0()).with_channel(7).index_entry(0)));
        assert!(!filter.passes(&message(2, SourceType::Goes, t0()).with_channel(7).index_entry(0)));
        assert!(!filter.passes(&message(1, SourceType::Goes, t0()).with_channel(9).index_entry(0)));
    }

    #[test]
    fn test_source_daps_status_and_sequence() {
        let mut criteria = SearchCriteria::new();
        criteria.sources.push(SourceType::Goes);
        criteria.daps_status = Some(DapsStatusMode::Reject);
        let filter = SearchFilter::new(criteria.clone(), FilterOptions::default());

        assert!(filter.passes(&entry(1, SourceType::GoesSelfTimed, t0())));
        assert!(!filter.passes(&entry(1, SourceType::Iridium, t0())));
        let mut status_msg = entry(1, SourceType::GoesSelfTimed, t0());
        status_msg.flags.failure_code = dds_types::FailureCode('M');
        assert!(!filter.passes(&status_msg));

        criteria.sources.clear();
        criteria.daps_status = None;
        criteria.sequence = Some(dds_types::SequenceRange::new(1000, 1010).unwrap());
        let filter = SearchFilter::new(criteria, FilterOptions::default());
        assert!(filter.passes(&message(1, SourceType::Iridium, t0()).with_sequence(1005).index_entry(0)));
        assert!(!filter.passes(&message(1, SourceType::Iridium, t0()).with_sequence(1011).index_entry(0)));
        assert!(!filter.passes(&entry(1, SourceType::Iridium, t0())));
    }

    #[test]
    fn test_baud_rate_and_spacecraft() {
        let mut criteria = SearchCriteria::new();
        criteria.baud_rates.push(BaudRate::B1200);
        criteria.spacecraft = Some(Spacecraft::East);
        let filter = SearchFilter::new(criteria, FilterOptions::default());

        let fast_odd = message(1, SourceType::Goes, t0()).with_channel(7).with_baud(BaudRate::B1200).index_entry(0);
        let slow_odd = message(1, SourceType::Goes, t0()).with_channel(7).with_baud(BaudRate::B300).index_entry(0);
        let fast_even = message(1, SourceType::Goes, t0()).with_channel(8).with_baud(BaudRate::B1200).index_entry(0);
        let unknown = message(1, SourceType::Goes, t0()).with_channel(7).index_entry(0);
        assert!(filter.passes(&fast_odd));
        assert!(!filter.passes(&slow_odd));
        assert!(!filter.passes(&fast_even));
        assert!(filter.passes(&unknown));
    }

    #[test]
    fn test_force_ascending() {
        let criteria = SearchCriteria::new();
        assert!(!SearchFilter::new(criteria.clone(), FilterOptions::default()).force_ascending());

        let mut asc = criteria.clone();
        asc.ascending_time_only = true;
        assert!(SearchFilter::new(asc, FilterOptions::default()).force_ascending());

        let options = FilterOptions {
            force_ascending: true,
            ..FilterOptions::default()
        };
        assert!(SearchFilter::new(criteria, options).force_ascending());
    }

    fn arb_source() -> impl Strategy<Value = SourceType> {
        prop::sample::select(SourceType::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_outside_window_never_passes(
            offset in -7200i64..7200,
            span in 0i64..3600,
            source in arb_source(),
            good_only in any::<bool>(),
        ) {
            let since = t0();
            let until = t0() + Duration::seconds(span);
            let options = FilterOptions { good_only, ..FilterOptions::default() };
            let filter = SearchFilter::new(window(since, Some(until)), options);
            let at = t0() + Duration::seconds(offset);
            if at < since || at > until {
                prop_assert!(!filter.passes(&entry(1, source, at)));
            }
        }

        #[test]
        fn prop_old_clients_never_get_burst(version in 0u32..MIN_BURST_PROTOCOL_VERSION, addr in any::<u32>()) {
            let options = FilterOptions { protocol_version: version, ..FilterOptions::default() };
            let filter = SearchFilter::new(SearchCriteria::new(), options);
            prop_assert!(!filter.passes(&entry(addr, SourceType::Iridium, t0())));
        }

        #[test]
        fn prop_good_only_leaves_unchecked_sources_alone(source in arb_source(), code in prop::char::range('A', 'Z')) {
            let mut e = entry(1, source, t0());
            e.flags.failure_code = dds_types::FailureCode(code);
            let plain = SearchFilter::new(SearchCriteria::new(), FilterOptions::default());
            let good = SearchFilter::new(
                SearchCriteria::new(),
                FilterOptions { good_only: true, ..FilterOptions::default() },
            );
            if source.is_quality_checked() && code != 'G' {
                prop_assert!(!good.passes(&e));
            } else {
                prop_assert_eq!(good.passes(&e), plain.passes(&e));
            }
        }
    }
}

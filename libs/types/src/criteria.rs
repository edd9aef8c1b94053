//! Search criteria and their line-oriented text form
//!
//! Criteria are uploaded by clients and built by the outage recovery engine.
//! The text form is one `KEYWORD: value` per line; blank lines and lines
//! starting with `#` are ignored.

use crate::time::TimeSpec;
use crate::{BaudRate, DcpAddress, Result, SourceType, TypesError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// How messages with a particular property are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DapsStatusMode {
    Accept,
    Reject,
    /// Only messages with the property pass.
    Exclusive,
}

impl DapsStatusMode {
    fn parse(token: &str) -> Option<Self> {
        match token.chars().next()?.to_ascii_uppercase() {
            'A' | 'Y' => Some(Self::Accept),
            'R' | 'N' => Some(Self::Reject),
            'O' => Some(Self::Exclusive),
            _ => None,
        }
    }

    fn letter(self) -> char {
        match self {
            Self::Accept => 'A',
            Self::Reject => 'R',
            Self::Exclusive => 'O',
        }
    }

    /// Applies the mode to a message that does (`has == true`) or does not
    /// have the property.
    pub fn admits(self, has: bool) -> bool {
        match self {
            Self::Accept => true,
            Self::Reject => !has,
            Self::Exclusive => has,
        }
    }
}

/// Channel criterion. `and` tokens require the address criteria to match as
/// well; `or` tokens pass on the channel alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelToken {
    pub channel: u16,
    pub and: bool,
}

impl ChannelToken {
    pub fn and(channel: u16) -> Self {
        Self { channel, and: true }
    }

    pub fn or(channel: u16) -> Self {
        Self { channel, and: false }
    }
}

impl fmt::Display for ChannelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", if self.and { '&' } else { '|' }, self.channel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Spacecraft {
    East,
    West,
}

/// Inclusive satellite sequence-number range, always `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceRange {
    start: u16,
    end: u16,
}

impl SequenceRange {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start > end {
            return Err(TypesError::inconsistent(format!(
                "sequence start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, seq: u16) -> bool {
        (self.start..=self.end).contains(&seq)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub lrgs_since: Option<TimeSpec>,
    pub lrgs_until: Option<TimeSpec>,
    pub daps_since: Option<TimeSpec>,
    pub daps_until: Option<TimeSpec>,
    pub addresses: BTreeSet<DcpAddress>,
    pub network_lists: Vec<String>,
    pub dcp_names: Vec<String>,
    pub sources: Vec<SourceType>,
    pub channels: Vec<ChannelToken>,
    pub daps_status: Option<DapsStatusMode>,
    pub retransmitted: Option<DapsStatusMode>,
    pub spacecraft: Option<Spacecraft>,
    pub sequence: Option<SequenceRange>,
    pub baud_rates: Vec<BaudRate>,
    pub ascending_time_only: bool,
    pub realtime_settling_delay: bool,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a criteria block. Keywords are case-insensitive and the
    /// trailing colon is optional.
    pub fn parse(text: &str) -> Result<Self> {
        let mut crit = SearchCriteria::default();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (kw, value) = match line.split_once(char::is_whitespace) {
                Some((kw, value)) => (kw, value.trim()),
                None => (line, ""),
            };
            let keyword = kw.trim_end_matches(':').to_ascii_uppercase();
            let first = value.split_whitespace().next();
            let missing = |what: &str| TypesError::bad_value(&keyword, line_no, format!("expected {}", what));

            match keyword.as_str() {
                "LRGS_SINCE" | "DRS_SINCE" | "LRGSSINCE" | "DRSSINCE" => {
                    crit.lrgs_since = Some(parse_time(&keyword, line_no, value)?);
                }
                "LRGS_UNTIL" | "DRS_UNTIL" | "LRGSUNTIL" | "DRSUNTIL" => {
                    crit.lrgs_until = Some(parse_time(&keyword, line_no, value)?);
                }
                "DAPS_SINCE" | "DAPSSINCE" => {
                    crit.daps_since = Some(parse_time(&keyword, line_no, value)?);
                }
                "DAPS_UNTIL" | "DAPSUNTIL" => {
                    crit.daps_until = Some(parse_time(&keyword, line_no, value)?);
                }
                "NETWORKLIST" | "NETWORK_LIST" => {
                    let name = first.ok_or_else(|| missing("network list name"))?;
                    crit.network_lists.push(name.to_string());
                }
                "DCP_NAME" => {
                    let name = first.ok_or_else(|| missing("DCP name"))?;
                    crit.dcp_names.push(name.to_string());
                }
                "DCP_ADDRESS" | "DCPADDRESS" => {
                    let tok = first.ok_or_else(|| missing("DCP address"))?;
                    let addr = tok
                        .parse()
                        .map_err(|e: TypesError| TypesError::bad_value(&keyword, line_no, e.to_string()))?;
                    crit.addresses.insert(addr);
                }
                "DAPS_STATUS" => {
                    crit.daps_status = Some(parse_mode(&keyword, line_no, first)?);
                }
                "RETRANSMITTED" => {
                    crit.retransmitted = Some(parse_mode(&keyword, line_no, first)?);
                }
                "CHANNEL" => {
                    let compact: String = value.split_whitespace().collect();
                    if compact.is_empty() {
                        return Err(missing("channel number"));
                    }
                    crit.channels
                        .extend(parse_channels(&keyword, line_no, &compact)?);
                }
                "SOURCE" => {
                    let tok = first.ok_or_else(|| missing("source name"))?;
                    let source = SourceType::from_keyword(tok).ok_or_else(|| {
                        TypesError::bad_value(&keyword, line_no, format!("no such source '{}'", tok))
                    })?;
                    if !crit.sources.contains(&source) {
                        crit.sources.push(source);
                    }
                }
                "SPACECRAFT" => {
                    let tok = first.ok_or_else(|| missing("E or W"))?;
                    crit.spacecraft = match tok.chars().next().map(|c| c.to_ascii_uppercase()) {
                        Some('E') => Some(Spacecraft::East),
                        Some('W') => Some(Spacecraft::West),
                        _ => {
                            return Err(TypesError::bad_value(
                                &keyword,
                                line_no,
                                format!("bad spacecraft '{}'", tok),
                            ))
                        }
                    };
                }
                "SEQUENCE" => {
                    let mut toks = value.split_whitespace();
                    let start = parse_u16(&keyword, line_no, toks.next(), "sequence start")?;
                    let end = parse_u16(&keyword, line_no, toks.next(), "sequence end")?;
                    crit.sequence = Some(
                        SequenceRange::new(start, end)
                            .map_err(|e| TypesError::bad_value(&keyword, line_no, e.to_string()))?,
                    );
                }
                "BAUD" => {
                    if value.is_empty() {
                        return Err(missing("baud rate"));
                    }
                    for tok in value.split(|c: char| c == ',' || c.is_whitespace()) {
                        if tok.is_empty() {
                            continue;
                        }
                        let bps: u32 = tok.parse().map_err(|_| {
                            TypesError::bad_value(&keyword, line_no, format!("bad baud '{}'", tok))
                        })?;
                        crit.baud_rates.push(BaudRate::from_bps(bps));
                    }
                }
                "ASCENDING_TIME" => {
                    crit.ascending_time_only = parse_bool(&keyword, line_no, first)?;
                }
                "RT_SETTLE_DELAY" => {
                    crit.realtime_settling_delay = parse_bool(&keyword, line_no, first)?;
                }
                _ => {
                    return Err(TypesError::UnknownKeyword {
                        keyword: kw.to_string(),
                        line: line_no,
                    })
                }
            }
        }

        crit.validate()?;
        Ok(crit)
    }

    /// Rejects criteria whose absolute until-time precedes the since-time.
    pub fn validate(&self) -> Result<()> {
        if let (Some(TimeSpec::Absolute(since)), Some(TimeSpec::Absolute(until))) =
            (self.lrgs_since, self.lrgs_until)
        {
            if until < since {
                return Err(TypesError::inconsistent("LRGS_UNTIL is before LRGS_SINCE"));
            }
        }
        Ok(())
    }

    pub fn has_address_criteria(&self) -> bool {
        !self.addresses.is_empty() || !self.network_lists.is_empty() || !self.dcp_names.is_empty()
    }

    pub fn add_channel_token(&mut self, token: ChannelToken) {
        if !self.channels.contains(&token) {
            self.channels.push(token);
        }
    }
}

fn parse_time(keyword: &str, line: usize, value: &str) -> Result<TimeSpec> {
    TimeSpec::parse(value).map_err(|e| TypesError::bad_value(keyword, line, e.to_string()))
}

fn parse_mode(keyword: &str, line: usize, token: Option<&str>) -> Result<DapsStatusMode> {
    token
        .and_then(DapsStatusMode::parse)
        .ok_or_else(|| TypesError::bad_value(keyword, line, "expected A, R or O"))
}

fn parse_bool(keyword: &str, line: usize, token: Option<&str>) -> Result<bool> {
    match token.map(|t| t.to_ascii_lowercase()).as_deref() {
        Some("true" | "yes" | "on" | "y" | "1") => Ok(true),
        Some("false" | "no" | "off" | "n" | "0") => Ok(false),
        _ => Err(TypesError::bad_value(keyword, line, "expected true or false")),
    }
}

fn parse_u16(keyword: &str, line: usize, token: Option<&str>, what: &str) -> Result<u16> {
    let tok = token.ok_or_else(|| TypesError::bad_value(keyword, line, format!("expected {}", what)))?;
    tok.parse()
        .map_err(|_| TypesError::bad_value(keyword, line, format!("non-numeric {} '{}'", what, tok)))
}

/// `&n`, `|n`, bare `n` (OR), or an inclusive `a-b` range of AND tokens.
fn parse_channels(keyword: &str, line: usize, token: &str) -> Result<Vec<ChannelToken>> {
    let bad = || TypesError::bad_value(keyword, line, format!("bad channel '{}'", token));

    if let Some((a, b)) = token.split_once('-') {
        let start: u16 = a.trim_start_matches(['&', '|']).parse().map_err(|_| bad())?;
        let end: u16 = b.parse().map_err(|_| bad())?;
        if start > end {
            return Err(bad());
        }
        return Ok((start..=end).map(ChannelToken::and).collect());
    }

    let (and, digits) = match token.as_bytes()[0] {
        b'&' => (true, &token[1..]),
        b'|' => (false, &token[1..]),
        _ => (false, token),
    };
    let channel: u16 = digits.parse().map_err(|_| bad())?;
    Ok(vec![ChannelToken { channel, and }])
}

impl fmt::Display for SearchCriteria {
    /// Writes the text form accepted by [`SearchCriteria::parse`].
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(t) = &self.lrgs_since {
            writeln!(f, "LRGS_SINCE: {}", t)?;
        }
        if let Some(t) = &self.lrgs_until {
            writeln!(f, "LRGS_UNTIL: {}", t)?;
        }
        if let Some(t) = &self.daps_since {
            writeln!(f, "DAPS_SINCE: {}", t)?;
        }
        if let Some(t) = &self.daps_until {
            writeln!(f, "DAPS_UNTIL: {}", t)?;
        }
        for name in &self.network_lists {
            writeln!(f, "NETWORKLIST: {}", name)?;
        }
        for name in &self.dcp_names {
            writeln!(f, "DCP_NAME: {}", name)?;
        }
        for addr in &self.addresses {
            writeln!(f, "DCP_ADDRESS: {}", addr)?;
        }
        if let Some(mode) = self.daps_status {
            writeln!(f, "DAPS_STATUS: {}", mode.letter())?;
        }
        if let Some(mode) = self.retransmitted {
            writeln!(f, "RETRANSMITTED: {}", mode.letter())?;
        }
        for chan in &self.channels {
            writeln!(f, "CHANNEL: {}", chan)?;
        }
        for source in &self.sources {
            writeln!(f, "SOURCE: {}", source)?;
        }
        match self.spacecraft {
            Some(Spacecraft::East) => writeln!(f, "SPACECRAFT: E")?,
            Some(Spacecraft::West) => writeln!(f, "SPACECRAFT: W")?,
            None => {}
        }
        if let Some(seq) = &self.sequence {
            writeln!(f, "SEQUENCE: {} {}", seq.start, seq.end)?;
        }
        let bauds: Vec<String> = self
            .baud_rates
            .iter()
            .filter_map(|b| b.bps())
            .map(|b| b.to_string())
            .collect();
        if !bauds.is_empty() {
            writeln!(f, "BAUD: {}", bauds.join(","))?;
        }
        if self.ascending_time_only {
            writeln!(f, "ASCENDING_TIME: true")?;
        }
        if self.realtime_settling_delay {
            writeln!(f, "RT_SETTLE_DELAY: true")?;
        }
        Ok(())
    }
}

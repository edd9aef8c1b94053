//! Time expressions accepted in criteria text
//!
//! `YYYY/DDD HH:MM:SS` (day-of-year), `now`, `now - N <unit>`,
//! `now + N <unit>` and `last`.

use crate::{Result, TypesError};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TIME_FORMAT: &str = "%Y/%j %H:%M:%S";

const ACCEPTED_FORMATS: [&str; 3] = [TIME_FORMAT, "%Y/%j %H:%M", "%Y-%m-%d %H:%M:%S"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeSpec {
    Absolute(DateTime<Utc>),
    /// Offset in seconds relative to the moment the criteria are evaluated.
    Relative(i64),
    /// Resume from the client's persisted last receive time.
    Last,
}

impl TimeSpec {
    pub fn now() -> Self {
        TimeSpec::Relative(0)
    }

    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        let invalid = || TypesError::InvalidTime {
            input: input.to_string(),
        };

        if s.eq_ignore_ascii_case("last") {
            return Ok(TimeSpec::Last);
        }

        if s.get(..3).is_some_and(|head| head.eq_ignore_ascii_case("now")) {
            let rest = s[3..].trim();
            if rest.is_empty() {
                return Ok(TimeSpec::Relative(0));
            }
            let (sign, rest) = match rest.as_bytes()[0] {
                b'-' => (-1, rest[1..].trim()),
                b'+' => (1, rest[1..].trim()),
                _ => return Err(invalid()),
            };
            let digits_end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            let count: i64 = rest[..digits_end].parse().map_err(|_| invalid())?;
            let unit = unit_seconds(rest[digits_end..].trim()).ok_or_else(invalid)?;
            return Ok(TimeSpec::Relative(sign * count * unit));
        }

        for fmt in ACCEPTED_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(TimeSpec::Absolute(Utc.from_utc_datetime(&naive)));
            }
        }
        Err(invalid())
    }

    /// Resolves to a concrete instant. `Last` falls back to `now` when the
    /// client has no saved position.
    pub fn resolve(&self, now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> DateTime<Utc> {
        match self {
            TimeSpec::Absolute(t) => *t,
            TimeSpec::Relative(secs) => now + Duration::seconds(*secs),
            TimeSpec::Last => last.unwrap_or(now),
        }
    }
}

fn unit_seconds(unit: &str) -> Option<i64> {
    let unit = unit.to_ascii_lowercase();
    let secs = match unit.trim_end_matches('s') {
        "" | "sec" | "second" => 1,
        "m" | "min" | "minute" => 60,
        "h" | "hr" | "hour" => 3600,
        "d" | "day" => 86_400,
        "w" | "week" => 7 * 86_400,
        _ => return None,
    };
    Some(secs)
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSpec::Absolute(t) => write!(f, "{}", t.format(TIME_FORMAT)),
            TimeSpec::Relative(0) => f.write_str("now"),
            TimeSpec::Relative(secs) if *secs < 0 => write!(f, "now - {} seconds", -secs),
            TimeSpec::Relative(secs) => write!(f, "now + {} seconds", secs),
            TimeSpec::Last => f.write_str("last"),
        }
    }
}

pub fn format_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_of_year_format() {
        let parsed = TimeSpec::parse("2024/032 12:30:00").unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 2, 1, 12, 30, 0).unwrap();
        assert_eq!(parsed, TimeSpec::Absolute(expected));
        assert_eq!(parsed.to_string(), "2024/032 12:30:00");
    }

    #[test]
    fn test_relative_expressions() {
        assert_eq!(TimeSpec::parse("now").unwrap(), TimeSpec::Relative(0));
        assert_eq!(TimeSpec::parse("now - 1 hour").unwrap(), TimeSpec::Relative(-3600));
        assert_eq!(TimeSpec::parse("NOW + 10 seconds").unwrap(), TimeSpec::Relative(10));
        assert_eq!(TimeSpec::parse("now-2days").unwrap(), TimeSpec::Relative(-172_800));
    }

    #[test]
    fn test_last_resolves_to_saved_time() {
        let now = Utc::now();
        let saved = now - Duration::minutes(5);
        assert_eq!(TimeSpec::Last.resolve(now, Some(saved)), saved);
        assert_eq!(TimeSpec::Last.resolve(now, None), now);
    }

    #[test]
    fn test_rejects_bad_expressions() {
        assert!(TimeSpec::parse("yesterday").is_err());
        assert!(TimeSpec::parse("now - 3 fortnights").is_err());
        assert!(TimeSpec::parse("now * 2 hours").is_err());
    }
}

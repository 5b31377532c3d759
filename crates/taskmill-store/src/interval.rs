//! Human-readable intervals such as `"30s"`, `"5m"` or `"1d"`.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

fn interval_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)(ms|s|m|h|d)$").expect("interval regex is valid"))
}

/// Unit of an [`Interval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalUnit {
    Millis,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    fn suffix(self) -> &'static str {
        match self {
            IntervalUnit::Millis => "ms",
            IntervalUnit::Seconds => "s",
            IntervalUnit::Minutes => "m",
            IntervalUnit::Hours => "h",
            IntervalUnit::Days => "d",
        }
    }

    fn millis(self) -> u64 {
        match self {
            IntervalUnit::Millis => 1,
            IntervalUnit::Seconds => 1_000,
            IntervalUnit::Minutes => 60_000,
            IntervalUnit::Hours => 3_600_000,
            IntervalUnit::Days => 86_400_000,
        }
    }
}

/// A fixed period, written as an integer followed by a unit suffix.
///
/// Used for recurring task schedules and for the durations in the scheduler
/// configuration. Serializes as its string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    amount: u64,
    unit: IntervalUnit,
}

/// Error returned when an interval string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid interval {0:?}: expected a number followed by ms, s, m, h or d")]
pub struct InvalidInterval(pub String);

impl Interval {
    pub const fn new(amount: u64, unit: IntervalUnit) -> Self {
        Self { amount, unit }
    }

    pub const fn millis(amount: u64) -> Self {
        Self::new(amount, IntervalUnit::Millis)
    }

    pub const fn seconds(amount: u64) -> Self {
        Self::new(amount, IntervalUnit::Seconds)
    }

    pub const fn minutes(amount: u64) -> Self {
        Self::new(amount, IntervalUnit::Minutes)
    }

    pub const fn hours(amount: u64) -> Self {
        Self::new(amount, IntervalUnit::Hours)
    }

    pub const fn days(amount: u64) -> Self {
        Self::new(amount, IntervalUnit::Days)
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn unit(&self) -> IntervalUnit {
        self.unit
    }

    /// Total length in milliseconds, saturating on overflow.
    pub fn as_millis(&self) -> u64 {
        self.amount.saturating_mul(self.unit.millis())
    }

    pub fn to_std(&self) -> Duration {
        Duration::from_millis(self.as_millis())
    }

    pub fn to_chrono(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.as_millis().min(i64::MAX as u64) as i64)
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

impl FromStr for Interval {
    type Err = InvalidInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = interval_regex()
            .captures(s.trim())
            .ok_or_else(|| InvalidInterval(s.to_string()))?;
        let amount = caps[1]
            .parse::<u64>()
            .map_err(|_| InvalidInterval(s.to_string()))?;
        let unit = match &caps[2] {
            "ms" => IntervalUnit::Millis,
            "s" => IntervalUnit::Seconds,
            "m" => IntervalUnit::Minutes,
            "h" => IntervalUnit::Hours,
            "d" => IntervalUnit::Days,
            _ => return Err(InvalidInterval(s.to_string())),
        };
        Ok(Self { amount, unit })
    }
}

impl TryFrom<String> for Interval {
    type Error = InvalidInterval;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("10s", 10_000 ; "seconds")]
    #[test_case("5m", 300_000 ; "minutes")]
    #[test_case("1h", 3_600_000 ; "hours")]
    #[test_case("2d", 172_800_000 ; "days")]
    #[test_case("250ms", 250 ; "millis")]
    #[test_case(" 3s ", 3_000 ; "surrounding whitespace")]
    fn test_parse_valid(input: &str, millis: u64) {
        let interval: Interval = input.parse().unwrap();
        assert_eq!(interval.as_millis(), millis);
    }

    #[test_case("" ; "empty")]
    #[test_case("10" ; "missing unit")]
    #[test_case("m" ; "missing amount")]
    #[test_case("1w" ; "unknown unit")]
    #[test_case("-5m" ; "negative")]
    #[test_case("1.5h" ; "fractional")]
    fn test_parse_invalid(input: &str) {
        assert!(input.parse::<Interval>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let interval = Interval::minutes(5);
        let json = serde_json::to_string(&interval).unwrap();
        assert_eq!(json, "\"5m\"");

        let parsed: Interval = serde_json::from_str("\"90s\"").unwrap();
        assert_eq!(parsed, Interval::seconds(90));

        assert!(serde_json::from_str::<Interval>("\"soon\"").is_err());
    }

    #[test]
    fn test_chrono_matches_std() {
        let interval = Interval::hours(2);
        assert_eq!(interval.to_std(), Duration::from_secs(7200));
        assert_eq!(interval.to_chrono().num_seconds(), 7200);
    }

    proptest! {
        #[test]
        fn display_parses_back(amount in 0u64..1_000_000, unit in 0usize..5) {
            let unit = [
                IntervalUnit::Millis,
                IntervalUnit::Seconds,
                IntervalUnit::Minutes,
                IntervalUnit::Hours,
                IntervalUnit::Days,
            ][unit];
            let interval = Interval::new(amount, unit);
            let parsed: Interval = interval.to_string().parse().unwrap();
            prop_assert_eq!(parsed, interval);
        }
    }
}

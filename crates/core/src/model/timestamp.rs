use std::fmt;
use std::ops::Add;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, SecondsFormat, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

static LAST_ISSUED: AtomicI64 = AtomicI64::new(i64::MIN);

/// A UTC instant with millisecond precision.
///
/// The document store keeps dates with millisecond precision, so every
/// timestamp is truncated on construction. Both stores then hold the exact
/// same value and records compare equal after a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "DateTime<Utc>", into = "DateTime<Utc>")]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Builds a timestamp from milliseconds since the Unix epoch.
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// The current time, bumped to stay strictly later than every value this
    /// process returned before. Used to stamp `updatedAt` on writes, so two
    /// writes within one millisecond still order.
    pub fn now_monotonic() -> Self {
        let wall = Utc::now().timestamp_millis();
        let advance = |last: i64| wall.max(last.saturating_add(1));
        let previous = LAST_ISSUED
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(advance(last)))
            .unwrap_or_else(|previous| previous);
        Self::from_millis(advance(previous)).unwrap_or_else(Self::now)
    }

    /// RFC 3339 with exactly three fractional digits and a `Z` suffix.
    ///
    /// Strings in this format sort in chronological order.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse_rfc3339(value: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(value).map(|dt| Self::from(dt.with_timezone(&Utc)))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.trunc_subsecs(3))
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

impl Add<TimeDelta> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: TimeDelta) -> Self::Output {
        Self::from(self.0 + rhs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates_to_millis() {
        let dt = DateTime::parse_from_rfc3339("2024-03-01T10:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let ts = Timestamp::from(dt);

        assert_eq!(ts.to_rfc3339(), "2024-03-01T10:00:00.123Z");
        assert_eq!(Timestamp::from_millis(ts.timestamp_millis()), Some(ts));
    }

    #[test]
    fn test_rfc3339_round_trip() {
        let ts = Timestamp::from_millis(1_709_287_200_042).unwrap();
        let parsed = Timestamp::parse_rfc3339(&ts.to_rfc3339()).unwrap();

        assert_eq!(parsed, ts);
    }

    #[test]
    fn test_serde_uses_plain_datetime() {
        let ts = Timestamp::from_millis(0).unwrap();
        let json = serde_json::to_string(&ts).unwrap();

        assert_eq!(json, "\"1970-01-01T00:00:00Z\"");
        assert_eq!(serde_json::from_str::<Timestamp>(&json).unwrap(), ts);
    }

    #[test]
    fn test_add_delta() {
        let ts = Timestamp::from_millis(1_000).unwrap();
        let later = ts + TimeDelta::hours(1);

        assert_eq!(later.timestamp_millis(), 1_000 + 3_600_000);
    }

    #[test]
    fn test_now_monotonic_strictly_increases() {
        let before = Timestamp::now();
        let stamps: Vec<Timestamp> = (0..1_000).map(|_| Timestamp::now_monotonic()).collect();

        assert!(stamps[0] >= before);
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

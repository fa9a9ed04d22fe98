//! Valid-time timestamps.
//!
//! Timestamps have millisecond precision and render as
//! `YYYY-MM-DDTHH:MM:SS.mmmZ`, so their string order equals their time order
//! for every year between 0000 and 9999.

use crate::error::{Error, Result};
use chrono::{DateTime, LocalResult, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

/// `9999-01-01T00:00:00.000Z`, the `validTo` of an open snapshot.
const END_OF_TIME_MILLIS: i64 = 253_370_764_800_000;

/// A point in valid time, in milliseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn millis(&self) -> i64 {
        self.0
    }

    /// The end-of-time sentinel.
    pub fn end_of_time() -> Self {
        Self(END_OF_TIME_MILLIS)
    }

    pub fn is_end_of_time(&self) -> bool {
        self.0 == END_OF_TIME_MILLIS
    }

    pub fn plus_millis(&self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Parse any RFC 3339 string, truncating to millisecond precision.
    pub fn parse(s: &str) -> Result<Self> {
        let parsed = DateTime::parse_from_rfc3339(s)
            .map_err(|e| Error::Validation(format!("invalid timestamp {:?}: {}", s, e)))?;
        Ok(Self(parsed.with_timezone(&Utc).timestamp_millis()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Utc.timestamp_millis_opt(self.0) {
            LocalResult::Single(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            _ => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timestamp::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Source of "now" for auto-generated `validFrom` values.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp(Utc::now().timestamp_millis())
    }
}

/// A clock that only moves when told to. Used for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start.millis()),
        }
    }

    pub fn set(&self, to: Timestamp) {
        self.now.store(to.millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_of_time_renders() {
        assert_eq!(
            Timestamp::end_of_time().to_string(),
            "9999-01-01T00:00:00.000Z"
        );
    }

    #[test]
    fn test_parse_truncates_to_millis() {
        let t = Timestamp::parse("2024-01-01T00:00:00.123456Z").unwrap();
        assert_eq!(t.millis(), 1_704_067_200_123);
        assert_eq!(t.to_string(), "2024-01-01T00:00:00.123Z");
    }

    #[test]
    fn test_parse_offset() {
        let t = Timestamp::parse("2024-01-01T01:00:00.000+01:00").unwrap();
        assert_eq!(t.to_string(), "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_string_order_matches_time_order() {
        let a = Timestamp::from_millis(1_704_067_200_000);
        let b = a.plus_millis(1);
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn test_serde_as_string() {
        let t = Timestamp::from_millis(1_704_067_200_000);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"2024-01-01T00:00:00.000Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(Timestamp::from_millis(10));
        clock.advance(5);
        assert_eq!(clock.now().millis(), 15);
        clock.set(Timestamp::from_millis(1));
        assert_eq!(clock.now().millis(), 1);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            Timestamp::parse("yesterday"),
            Err(Error::Validation(_))
        ));
    }
}

use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// RFC 3339 timestamp with second precision.
///
/// Persisted timestamps are truncated to whole seconds so that two status
/// values built within the same second compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    pub fn new(datetime: OffsetDateTime) -> Self {
        let truncated = datetime
            .replace_nanosecond(0)
            .unwrap_or(datetime)
            .to_offset(time::UtcOffset::UTC);
        Self(truncated)
    }

    pub fn from_unix(seconds: i64) -> Result<Self> {
        OffsetDateTime::from_unix_timestamp(seconds)
            .map(Self)
            .map_err(|e| CoreError::invalid_timestamp(format!("{seconds}: {e}")))
    }

    pub fn inner(&self) -> &OffsetDateTime {
        &self.0
    }

    pub fn unix_timestamp(&self) -> i64 {
        self.0.unix_timestamp()
    }

    /// Time elapsed from `self` until `now`, or `None` when `self` lies in
    /// the future.
    pub fn elapsed_until(&self, now: Timestamp) -> Option<Duration> {
        let delta = now.0 - self.0;
        if delta.is_negative() {
            None
        } else {
            Duration::try_from(delta).ok()
        }
    }

    pub fn checked_add(&self, duration: Duration) -> Option<Timestamp> {
        let delta = time::Duration::try_from(duration).ok()?;
        self.0.checked_add(delta).map(Timestamp::new)
    }

    pub fn checked_sub(&self, duration: Duration) -> Option<Timestamp> {
        let delta = time::Duration::try_from(duration).ok()?;
        self.0.checked_sub(delta).map(Timestamp::new)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = self.0.format(&Rfc3339).map_err(|_| fmt::Error)?;
        write!(f, "{formatted}")
    }
}

impl FromStr for Timestamp {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let datetime = OffsetDateTime::parse(s, &Rfc3339).map_err(|e| {
            CoreError::invalid_timestamp(format!("Failed to parse timestamp '{s}': {e}"))
        })?;
        Ok(Timestamp::new(datetime))
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let formatted = self.0.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Timestamp::from_str(&s).map_err(serde::de::Error::custom)
    }
}

pub fn now_utc() -> Timestamp {
    Timestamp::new(OffsetDateTime::now_utc())
}

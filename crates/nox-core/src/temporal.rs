//! # Temporal Types: UTC-Only Timestamps
//!
//! Defines `Timestamp`, a UTC-only instant truncated to whole seconds.
//!
//! Bucket boundaries are computed on the UTC calendar date of a timestamp.
//! A server-local offset would move events across midnight and therefore
//! across buckets, so non-UTC inputs are rejected by the strict parser and
//! converted by the lenient one. There is no path that reads the host's
//! time zone.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NoxError;

/// A UTC-only timestamp, truncated to seconds precision.
///
/// # Construction
///
/// - [`Timestamp::from_utc()`]: from a `DateTime<Utc>`, truncating sub-seconds.
/// - [`Timestamp::parse()`]: from an ISO8601 string, rejecting non-UTC offsets.
/// - [`Timestamp::parse_date()`]: from `YYYY-MM-DD`, at midnight UTC.
///
/// Serde uses the strict `Z` form in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp from a `chrono::DateTime<Utc>`, truncating sub-seconds.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(truncate_to_seconds(dt))
    }

    /// Midnight UTC at the start of `date`.
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    /// Last whole second of `date` in UTC (`23:59:59`).
    pub fn end_of_date(date: NaiveDate) -> Self {
        Self(Self::from_date(date).0 + chrono::Duration::seconds(86_399))
    }

    /// Parse a timestamp from an RFC 3339 / ISO8601 string.
    ///
    /// Only the `Z` suffix is accepted. Explicit offsets, `+00:00` included,
    /// are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`NoxError::Timestamp`] if the string is not RFC 3339 or uses
    /// a non-Z offset.
    pub fn parse(s: &str) -> Result<Self, NoxError> {
        if !s.ends_with('Z') {
            return Err(NoxError::Timestamp(format!(
                "timestamp must use Z suffix (UTC only), got: {s:?}"
            )));
        }
        Self::parse_lenient(s)
    }

    /// Parse an RFC 3339 string with any offset, converting to UTC.
    ///
    /// For ingesting gateway payloads whose clocks report local offsets.
    pub fn parse_lenient(s: &str) -> Result<Self, NoxError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| NoxError::Timestamp(format!("invalid RFC 3339 timestamp {s:?}: {e}")))?;
        Ok(Self(truncate_to_seconds(dt.with_timezone(&Utc))))
    }

    /// Parse a calendar date (`YYYY-MM-DD`) as midnight UTC.
    pub fn parse_date(s: &str) -> Result<Self, NoxError> {
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|e| NoxError::Timestamp(format!("invalid date {s:?}: {e}")))?;
        Ok(Self::from_date(date))
    }

    /// Create a timestamp from a Unix epoch timestamp (seconds).
    pub fn from_epoch_secs(secs: i64) -> Result<Self, NoxError> {
        let dt = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| NoxError::Timestamp(format!("invalid Unix timestamp: {secs}")))?;
        Ok(Self(dt))
    }

    /// Access the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// The UTC calendar date of this instant.
    pub fn date(&self) -> NaiveDate {
        self.0.date_naive()
    }

    /// Returns the Unix epoch timestamp in seconds.
    pub fn epoch_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// Render as ISO8601 with Z suffix (e.g., `2024-03-01T22:30:00Z`).
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_utc(dt)
    }
}

impl TryFrom<String> for Timestamp {
    type Error = NoxError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.to_iso8601()
    }
}

/// Truncate a `DateTime<Utc>` to seconds precision (discard nanoseconds).
fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

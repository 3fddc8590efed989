//! # Bucketizer: Gap-Free Time Series Skeletons
//!
//! Venue dashboards chart reservations and revenue over a caller-chosen
//! window. A chart fed only with the days that had events shows a misleading
//! line that skips quiet nights, so every series is built in two steps:
//!
//! 1. Generate every bucket key in the window and zero-initialize it.
//! 2. Fold real data points into the bucket chosen by [`bucket_key_of`].
//!
//! Both steps use the same key function, so a data point inside the window
//! always lands in a bucket that already exists.
//!
//! ## Granularity
//!
//! Windows spanning at most [`MAX_DAY_SPAN`] calendar days are bucketed per
//! day; longer windows per ISO week (Monday start, regardless of locale).
//!
//! ## Date Semantics
//!
//! Only the UTC calendar date of each bound participates in boundary math.
//! `2024-03-01T23:59:00Z .. 2024-03-02T00:01:00Z` spans one day and yields two
//! day buckets.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::BucketError;
use crate::temporal::Timestamp;

/// Longest window, in whole calendar days, that is still bucketed per day.
pub const MAX_DAY_SPAN: i64 = 10;

// ---------------------------------------------------------------------------
// TimeRange
// ---------------------------------------------------------------------------

/// A closed UTC time window with `from <= to`.
///
/// The invariant is checked by [`TimeRange::new`] and on deserialization, so
/// every `TimeRange` value in the program is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
    from: Timestamp,
    to: Timestamp,
}

#[derive(Deserialize)]
struct RawTimeRange {
    from: Timestamp,
    to: Timestamp,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = BucketError;

    fn try_from(raw: RawTimeRange) -> Result<Self, Self::Error> {
        Self::new(raw.from, raw.to)
    }
}

impl TimeRange {
    /// Create a range, rejecting reversed bounds.
    ///
    /// # Errors
    ///
    /// [`BucketError::InvalidRange`] when `from > to`.
    pub fn new(from: Timestamp, to: Timestamp) -> Result<Self, BucketError> {
        if from > to {
            return Err(BucketError::InvalidRange {
                from: from.to_iso8601(),
                to: to.to_iso8601(),
            });
        }
        Ok(Self { from, to })
    }

    /// Lower bound.
    pub fn start(&self) -> Timestamp {
        self.from
    }

    /// Upper bound.
    pub fn end(&self) -> Timestamp {
        self.to
    }

    /// Whole calendar days between the bounds' UTC dates.
    pub fn span_days(&self) -> i64 {
        (self.to.date() - self.from.date()).num_days()
    }

    /// Whether `ts` falls on a calendar date inside the range.
    pub fn contains_date(&self, ts: Timestamp) -> bool {
        let date = ts.date();
        self.from.date() <= date && date <= self.to.date()
    }
}

// ---------------------------------------------------------------------------
// Granularity & keys
// ---------------------------------------------------------------------------

/// Bucket size. Derived from a range, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One bucket per UTC calendar day.
    Day,
    /// One bucket per ISO week, keyed by its Monday.
    Week,
}

impl Granularity {
    /// Return the string representation of this granularity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calendar date identifying one bucket, rendered `YYYY-MM-DD`.
///
/// Ordering is chronological, which coincides with lexicographic ordering of
/// the rendered form for four-digit years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketKey(NaiveDate);

impl BucketKey {
    /// Wrap a calendar date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// The bucket's calendar date.
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Pick the bucket size for a range: per day up to [`MAX_DAY_SPAN`] days
/// inclusive, per week beyond.
pub fn choose_granularity(range: &TimeRange) -> Granularity {
    if range.span_days() <= MAX_DAY_SPAN {
        Granularity::Day
    } else {
        Granularity::Week
    }
}

/// Validate raw bounds and pick their granularity in one step.
///
/// # Errors
///
/// [`BucketError::InvalidRange`] when `from > to`.
pub fn granularity_between(from: Timestamp, to: Timestamp) -> Result<Granularity, BucketError> {
    TimeRange::new(from, to).map(|range| choose_granularity(&range))
}

/// Map a timestamp to the key of the bucket containing it.
///
/// `Week` keys are the Monday on or before the UTC date: Sunday steps back
/// six days, any other weekday steps back `weekday - 1` days.
pub fn bucket_key_of(timestamp: Timestamp, granularity: Granularity) -> BucketKey {
    let date = timestamp.date();
    match granularity {
        Granularity::Day => BucketKey(date),
        Granularity::Week => BucketKey(week_start(date)),
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    let back = u64::from(date.weekday().num_days_from_monday());
    // Saturates at the calendar minimum.
    date.checked_sub_days(Days::new(back)).unwrap_or(date)
}

/// Every bucket key covering `range`, ascending, without duplicates.
///
/// `Day` emits each date from `from` to `to` inclusive. `Week` starts at the
/// Monday of `from`'s week and steps seven days while the Monday is not after
/// `to`'s date.
pub fn generate_bucket_sequence(range: &TimeRange, granularity: Granularity) -> Vec<BucketKey> {
    let end = range.end().date();
    let (mut cursor, step) = match granularity {
        Granularity::Day => (range.start().date(), Days::new(1)),
        Granularity::Week => (week_start(range.start().date()), Days::new(7)),
    };

    let mut keys = Vec::new();
    while cursor <= end {
        keys.push(BucketKey(cursor));
        cursor = match cursor.checked_add_days(step) {
            Some(next) => next,
            None => break,
        };
    }
    keys
}

/// Build a map with one independently constructed zero value per key.
///
/// `zero_factory` is called once per key, so aggregates never alias.
pub fn initialize_bucket_map<T, F>(
    keys: impl IntoIterator<Item = BucketKey>,
    mut zero_factory: F,
) -> BucketMap<T>
where
    F: FnMut() -> T,
{
    BucketMap {
        buckets: keys.into_iter().map(|k| (k, zero_factory())).collect(),
    }
}

// ---------------------------------------------------------------------------
// BucketMap
// ---------------------------------------------------------------------------

/// Ordered, gap-free mapping from bucket key to aggregate.
///
/// The key set is fixed at construction. Accumulation never inserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BucketMap<T> {
    buckets: BTreeMap<BucketKey, T>,
}

/// One bucket of a rendered series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketPoint<T> {
    /// Bucket key.
    pub bucket: BucketKey,
    /// Aggregate for the bucket.
    pub value: T,
}

impl<T> BucketMap<T> {
    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the map has no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Whether `key` is one of the pre-created buckets.
    pub fn contains(&self, key: &BucketKey) -> bool {
        self.buckets.contains_key(key)
    }

    /// Aggregate for `key`.
    pub fn get(&self, key: &BucketKey) -> Option<&T> {
        self.buckets.get(key)
    }

    /// Mutable aggregate for `key`.
    pub fn get_mut(&mut self, key: &BucketKey) -> Option<&mut T> {
        self.buckets.get_mut(key)
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &BucketKey> {
        self.buckets.keys()
    }

    /// `(key, aggregate)` pairs in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&BucketKey, &T)> {
        self.buckets.iter()
    }

    /// Apply `f` to the aggregate for `key`.
    ///
    /// Returns `false` and leaves the map untouched when `key` is not one of
    /// the pre-created buckets.
    pub fn accumulate(&mut self, key: &BucketKey, f: impl FnOnce(&mut T)) -> bool {
        match self.buckets.get_mut(key) {
            Some(agg) => {
                f(agg);
                true
            }
            None => false,
        }
    }

    /// Apply `f` to the bucket containing `timestamp`.
    pub fn accumulate_at(
        &mut self,
        timestamp: Timestamp,
        granularity: Granularity,
        f: impl FnOnce(&mut T),
    ) -> bool {
        self.accumulate(&bucket_key_of(timestamp, granularity), f)
    }

    /// Flatten into an ordered list of points.
    pub fn into_points(self) -> Vec<BucketPoint<T>> {
        self.buckets
            .into_iter()
            .map(|(bucket, value)| BucketPoint { bucket, value })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Bucketizer & series building
// ---------------------------------------------------------------------------

/// A range paired with the granularity chosen for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucketizer {
    range: TimeRange,
    granularity: Granularity,
}

impl Bucketizer {
    /// Bucketize `range` at its natural granularity.
    pub fn new(range: TimeRange) -> Self {
        Self {
            granularity: choose_granularity(&range),
            range,
        }
    }

    /// The range being bucketized.
    pub fn range(&self) -> &TimeRange {
        &self.range
    }

    /// Granularity chosen for the range.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// All bucket keys of the range.
    pub fn keys(&self) -> Vec<BucketKey> {
        generate_bucket_sequence(&self.range, self.granularity)
    }

    /// Key of the bucket containing `timestamp`.
    pub fn key_of(&self, timestamp: Timestamp) -> BucketKey {
        bucket_key_of(timestamp, self.granularity)
    }

    /// A zero-initialized map over all keys.
    pub fn empty_map<T>(&self, zero_factory: impl FnMut() -> T) -> BucketMap<T> {
        initialize_bucket_map(self.keys(), zero_factory)
    }
}

/// Result of [`build_series`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesBuild<T> {
    /// Granularity used.
    pub granularity: Granularity,
    /// Gap-free aggregates.
    pub buckets: BucketMap<T>,
    /// Points whose date fell outside the range.
    pub skipped: usize,
}

/// Bucketize `range` and fold each `(timestamp, value)` into its bucket.
///
/// Points dated outside the range are skipped and counted, including points
/// that precede `from` but share its week.
pub fn build_series<V, T>(
    range: &TimeRange,
    points: impl IntoIterator<Item = (Timestamp, V)>,
    zero_factory: impl FnMut() -> T,
    mut fold: impl FnMut(&mut T, V),
) -> SeriesBuild<T> {
    let bucketizer = Bucketizer::new(*range);
    let mut buckets = bucketizer.empty_map(zero_factory);
    let mut skipped = 0usize;

    for (ts, value) in points {
        if !bucketizer.range().contains_date(ts) {
            skipped += 1;
            continue;
        }
        let placed = buckets.accumulate(&bucketizer.key_of(ts), |agg| fold(agg, value));
        debug_assert!(placed, "in-range point missed its pre-created bucket");
    }

    if skipped > 0 {
        tracing::debug!(skipped, "points outside range dropped from series");
    }

    SeriesBuild {
        granularity: bucketizer.granularity(),
        buckets,
        skipped,
    }
}

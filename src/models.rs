//! Core domain models for tsdb-expire

use crate::error::{ExpireError, Result};
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A UTC instant truncated to its 24-hour boundary.
///
/// Every bucket key and every range boundary in the engine is a `Day`, so
/// comparisons never mix truncated and untruncated instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Day(DateTime<Utc>);

impl Day {
    /// Truncate an instant to the start of its UTC day.
    pub fn floor(at: DateTime<Utc>) -> Self {
        Day(at.date_naive().and_time(NaiveTime::default()).and_utc())
    }

    /// `floor(now - delta)`, saturating at the earliest representable day.
    pub fn before(now: DateTime<Utc>, delta: TimeDelta) -> Self {
        Day::floor(now.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    /// The instant this day starts at.
    pub fn start(&self) -> DateTime<Utc> {
        self.0
    }

    /// The following day.
    pub fn next(&self) -> Day {
        self.offset(1)
    }

    /// Shift by a number of whole days, saturating at the representable range.
    pub fn offset(&self, days: i64) -> Day {
        match self.0.checked_add_signed(TimeDelta::days(days)) {
            Some(at) => Day(at),
            None => *self,
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Half-open range of days, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayRange {
    pub start: Day,
    pub end: Day,
}

impl DayRange {
    pub fn new(start: Day, end: Day) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, day: Day) -> bool {
        self.start <= day && day < self.end
    }

    /// Split the range into store-sized sub-windows.
    pub fn windows(&self, breadth: TimeDelta) -> TimeWindows {
        TimeWindows::new(self.start.start(), self.end.start(), breadth)
    }
}

impl fmt::Display for DayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Iterator over consecutive, non-overlapping `[from, to)` windows no wider
/// than `breadth`. The final window is clipped to the end of the span.
#[derive(Debug, Clone)]
pub struct TimeWindows {
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    breadth: TimeDelta,
}

impl TimeWindows {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, breadth: TimeDelta) -> Self {
        Self {
            cursor: start,
            end,
            breadth,
        }
    }
}

impl Iterator for TimeWindows {
    type Item = (DateTime<Utc>, DateTime<Utc>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end || self.breadth <= TimeDelta::zero() {
            return None;
        }
        let stop = self
            .cursor
            .checked_add_signed(self.breadth)
            .map_or(self.end, |t| t.min(self.end));
        let window = (self.cursor, stop);
        self.cursor = stop;
        Some(window)
    }
}

/// Parse an OpenTSDB `dps` key (Unix seconds) into an instant.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let secs: i64 = raw
        .parse()
        .map_err(|_| ExpireError::QueryFailure(format!("invalid timestamp {:?}", raw)))?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| ExpireError::QueryFailure(format!("timestamp out of range: {}", secs)))
}

/// Day-keyed datapoint counts plus the first and last instant seen.
#[derive(Debug, Clone, Default)]
pub struct Activity {
    days: BTreeMap<Day, i64>,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
}

impl Activity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` datapoints observed at `at` to its day bucket.
    pub fn record(&mut self, at: DateTime<Utc>, count: i64) {
        if self.last_seen.map_or(true, |last| at > last) {
            self.last_seen = Some(at);
        }
        if self.first_seen.map_or(true, |first| at < first) {
            self.first_seen = Some(at);
        }
        *self.days.entry(Day::floor(at)).or_insert(0) += count;
    }

    /// Fold a `timestamp -> value` response map into the histogram.
    ///
    /// Returns the number of datapoints folded. A malformed timestamp fails
    /// the whole fold.
    pub fn fold(&mut self, dps: &BTreeMap<String, f64>) -> Result<usize> {
        for (raw, value) in dps {
            let at = parse_timestamp(raw)?;
            self.record(at, *value as i64);
        }
        Ok(dps.len())
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Number of day buckets.
    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn oldest_day(&self) -> Option<Day> {
        self.days.keys().next().copied()
    }

    pub fn newest_day(&self) -> Option<Day> {
        self.days.keys().next_back().copied()
    }

    pub fn count(&self, day: Day) -> i64 {
        self.days.get(&day).copied().unwrap_or(0)
    }

    pub fn total(&self) -> i64 {
        self.days.values().sum()
    }

    /// Day buckets in ascending order.
    pub fn days(&self) -> impl Iterator<Item = (Day, i64)> + '_ {
        self.days.iter().map(|(day, count)| (*day, *count))
    }

    pub fn first_seen(&self) -> Option<DateTime<Utc>> {
        self.first_seen
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }
}

/// One tag key/value combination of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    pub fn new(tags: BTreeMap<String, String>) -> Self {
        Self(tags)
    }

    /// A filter that matches every value of each given key.
    pub fn wildcard<'a>(keys: impl IntoIterator<Item = &'a String>) -> Self {
        Self(keys.into_iter().map(|k| (k.clone(), "*".to_string())).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

/// Canonical form: `{k1=v1,k2=v2}` with keys sorted.
impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        f.write_str("}")
    }
}

/// Activity of a single tag combination under a metric.
#[derive(Debug, Clone)]
pub struct TagSeries {
    pub tags: TagSet,
    pub activity: Activity,
}

impl TagSeries {
    pub fn new(tags: TagSet) -> Self {
        Self {
            tags,
            activity: Activity::new(),
        }
    }
}

/// A stored metric and everything learned about it during one pass.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub activity: Activity,
    /// Tag keys the store aggregated away in count responses
    pub tag_keys: BTreeSet<String>,
    /// Keyed by the canonical `TagSet` string
    pub tag_series: BTreeMap<String, TagSeries>,
}

impl Metric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            activity: Activity::new(),
            tag_keys: BTreeSet::new(),
            tag_series: BTreeMap::new(),
        }
    }

    /// The tag series for `tags`, created on first sight.
    pub fn tag_series_mut(&mut self, tags: &TagSet) -> &mut TagSeries {
        self.tag_series
            .entry(tags.to_string())
            .or_insert_with(|| TagSeries::new(tags.clone()))
    }
}

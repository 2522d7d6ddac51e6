//! In-memory store and fixtures for unit tests

use crate::config::Settings;
use crate::error::{ExpireError, Result};
use crate::models::{Day, DayRange, TagSet};
use crate::state::RunContext;
use crate::tsdb::{DownsampleFn, Query, QueryRequest, SeriesResult, TimeSeriesStore};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// Fixed reference instant for tests.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap()
}

/// The day `offset` days from `now()`'s day.
pub fn day(offset: i64) -> Day {
    Day::floor(now()).offset(offset)
}

pub fn context(store: &Arc<FakeStore>, settings: Settings) -> RunContext {
    RunContext::at(store.clone(), settings, false, now())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Query,
    Delete,
}

#[derive(Debug, Clone)]
struct FakeSeries {
    metric: String,
    tags: BTreeMap<String, String>,
    points: BTreeMap<DateTime<Utc>, f64>,
}

/// A store that answers queries from in-memory points, applies deletes and
/// records every call.
#[derive(Default)]
pub struct FakeStore {
    series: Mutex<Vec<FakeSeries>>,
    calls: Mutex<Vec<(CallKind, QueryRequest)>>,
    failures: Mutex<Vec<(CallKind, DateTime<Utc>)>>,
    fail_tag_queries: Mutex<bool>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// One point per hour with `value` for every day in `days`.
    pub fn hourly(&self, metric: &str, tags: &[(&str, &str)], days: DayRange, value: f64) {
        let tags: BTreeMap<String, String> = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut series = self.series.lock().unwrap();
        let idx = match series
            .iter()
            .position(|s| s.metric == metric && s.tags == tags)
        {
            Some(idx) => idx,
            None => {
                series.push(FakeSeries {
                    metric: metric.to_string(),
                    tags,
                    points: BTreeMap::new(),
                });
                series.len() - 1
            }
        };
        let mut at = days.start.start();
        while at < days.end.start() {
            series[idx].points.insert(at, value);
            at += TimeDelta::hours(1);
        }
    }

    /// Fail the next call of `kind` whose window starts at `start`.
    pub fn fail_at(&self, kind: CallKind, start: DateTime<Utc>) {
        self.failures.lock().unwrap().push((kind, start));
    }

    /// Fail every query that carries a tag filter.
    pub fn fail_tag_queries(&self) {
        *self.fail_tag_queries.lock().unwrap() = true;
    }

    pub fn calls(&self, kind: CallKind) -> Vec<QueryRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Raw points stored for `metric` on `day`, across all series.
    pub fn points_on(&self, metric: &str, day: Day) -> usize {
        let range = day.start()..day.next().start();
        self.series
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.metric == metric)
            .map(|s| s.points.range(range.clone()).count())
            .sum()
    }

    fn record(&self, kind: CallKind, request: &QueryRequest) -> Result<()> {
        self.calls.lock().unwrap().push((kind, request.clone()));
        let mut failures = self.failures.lock().unwrap();
        if let Some(pos) = failures
            .iter()
            .position(|(k, start)| *k == kind && *start == request.start)
        {
            failures.remove(pos);
            return Err(ExpireError::QueryFailure(format!(
                "injected failure at {}",
                request.start
            )));
        }
        if kind == CallKind::Query
            && *self.fail_tag_queries.lock().unwrap()
            && request.queries.iter().any(|q| !q.tags.is_empty())
        {
            return Err(ExpireError::QueryFailure("injected tag query failure".into()));
        }
        Ok(())
    }

    fn answer(&self, request: &QueryRequest, query: &Query) -> Vec<SeriesResult> {
        let series = self.series.lock().unwrap();
        let filter = query.tags.as_map();

        let mut groups: BTreeMap<BTreeMap<String, String>, Vec<&FakeSeries>> = BTreeMap::new();
        'series: for s in series.iter().filter(|s| s.metric == query.metric) {
            let mut key = BTreeMap::new();
            for (k, v) in filter {
                match s.tags.get(k) {
                    Some(actual) if v == "*" || v == actual => {
                        key.insert(k.clone(), actual.clone());
                    }
                    _ => continue 'series,
                }
            }
            groups.entry(key).or_default().push(s);
        }

        let mut results = Vec::new();
        for (tags, members) in groups {
            let mut combined: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
            for s in &members {
                let points = s.points.range(request.start..request.end);
                let buckets: BTreeMap<DateTime<Utc>, f64> = match &query.downsample {
                    None => points.map(|(t, v)| (*t, *v)).collect(),
                    Some(ds) => {
                        let mut by_day: BTreeMap<DateTime<Utc>, Vec<f64>> = BTreeMap::new();
                        for (t, v) in points {
                            by_day.entry(Day::floor(*t).start()).or_default().push(*v);
                        }
                        by_day
                            .into_iter()
                            .map(|(t, vs)| (t, reduce(ds.function, &vs)))
                            .collect()
                    }
                };
                for (t, v) in buckets {
                    combined
                        .entry(t)
                        .and_modify(|acc| *acc = combine(&query.aggregator, *acc, v))
                        .or_insert(v);
                }
            }
            if combined.is_empty() {
                continue;
            }
            let aggregate_tags: BTreeSet<String> = members
                .iter()
                .flat_map(|s| s.tags.keys())
                .filter(|k| !tags.contains_key(*k))
                .cloned()
                .collect();
            results.push(SeriesResult {
                metric: query.metric.clone(),
                tags: TagSet::new(tags),
                aggregate_tags: aggregate_tags.into_iter().collect(),
                dps: combined
                    .into_iter()
                    .map(|(t, v)| (t.timestamp().to_string(), v))
                    .collect(),
            });
        }
        results
    }
}

/// Cross-series aggregation; anything unrecognised sums.
fn combine(aggregator: &str, acc: f64, value: f64) -> f64 {
    match aggregator {
        "max" => acc.max(value),
        "min" => acc.min(value),
        _ => acc + value,
    }
}

fn reduce(function: DownsampleFn, values: &[f64]) -> f64 {
    match function {
        DownsampleFn::Count => values.len() as f64,
        DownsampleFn::Sum => values.iter().sum(),
        DownsampleFn::Max => values.iter().copied().fold(f64::MIN, f64::max),
        DownsampleFn::Min => values.iter().copied().fold(f64::MAX, f64::min),
    }
}

#[async_trait]
impl TimeSeriesStore for FakeStore {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<SeriesResult>> {
        self.record(CallKind::Query, request)?;
        Ok(request
            .queries
            .iter()
            .flat_map(|q| self.answer(request, q))
            .collect())
    }

    async fn delete(&self, request: &QueryRequest) -> Result<()> {
        self.record(CallKind::Delete, request)?;
        let mut series = self.series.lock().unwrap();
        for query in &request.queries {
            for s in series.iter_mut().filter(|s| s.metric == query.metric) {
                let doomed: Vec<DateTime<Utc>> = s
                    .points
                    .range(request.start..request.end)
                    .map(|(t, _)| *t)
                    .collect();
                for t in doomed {
                    s.points.remove(&t);
                }
            }
        }
        Ok(())
    }
}

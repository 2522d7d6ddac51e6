//! Tag set collection - enumerates tag combinations in volume-sized batches

use crate::error::Result;
use crate::models::{Day, Metric, TagSet};
use crate::state::RunContext;
use crate::tsdb::{Downsample, DownsampleFn, Query, QueryRequest};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Outcome of a tag collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagCollection {
    pub batches: usize,
    pub failed_batches: usize,
}

impl TagCollection {
    /// True when at least one batch failed, so some series may be missing.
    pub fn is_partial(&self) -> bool {
        self.failed_batches > 0
    }
}

/// Populate `metric.tag_series` from its already aggregated histogram.
///
/// Days are walked oldest first. Once the running count exceeds the
/// configured threshold, the accumulated span is queried with every known
/// tag key wildcarded, and the next span starts on the following day. A
/// non-zero remainder is queried up to `now`. Failed batches are skipped.
pub async fn collect(ctx: &RunContext, metric: &mut Metric) -> TagCollection {
    let threshold = ctx.settings.tag_batch_threshold;
    let mut outcome = TagCollection::default();
    let mut span_start: Option<Day> = None;
    let mut running: i64 = 0;

    let days: Vec<(Day, i64)> = metric.activity.days().collect();
    for (day, count) in days {
        let start = *span_start.get_or_insert(day);
        running += count;
        if running > threshold {
            run_batch(ctx, metric, start.start(), day.next().start(), &mut outcome).await;
            running = 0;
            span_start = Some(day.next());
        }
    }

    if running != 0 {
        if let Some(start) = span_start {
            run_batch(ctx, metric, start.start(), ctx.now, &mut outcome).await;
        }
    }

    info!(
        metric = %metric.name,
        series = metric.tag_series.len(),
        batches = outcome.batches,
        failed = outcome.failed_batches,
        "Tag sets gathered"
    );
    outcome
}

async fn run_batch(
    ctx: &RunContext,
    metric: &mut Metric,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    outcome: &mut TagCollection,
) {
    outcome.batches += 1;
    if let Err(e) = gather_tag_sets(ctx, metric, start, end).await {
        outcome.failed_batches += 1;
        warn!(
            error = %e,
            metric = %metric.name,
            start = %start,
            end = %end,
            "Tag set batch failed, keeping earlier results"
        );
    }
}

async fn gather_tag_sets(
    ctx: &RunContext,
    metric: &mut Metric,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<()> {
    let query = Query::sum(&metric.name)
        .downsample(Downsample::daily(DownsampleFn::Count))
        .tags(TagSet::wildcard(&metric.tag_keys));
    let request = QueryRequest::new(start, end, vec![query]);
    debug!(request = %request, "Tag set query");

    let response = ctx.store.query(&request).await?;
    for series in &response {
        metric.tag_series_mut(&series.tags).activity.fold(&series.dps)?;
    }
    Ok(())
}

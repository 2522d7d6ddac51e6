//! Deletion - issues chunked deletes, optionally gated on all-zero values

use crate::error::Result;
use crate::models::DayRange;
use crate::state::RunContext;
use crate::tsdb::{Downsample, DownsampleFn, Query, QueryRequest, SeriesResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

/// How a decided range is acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Delete every sub-window
    Unconditional,
    /// Delete only sub-windows whose max and min are both zero everywhere
    ZeroOnlyVerify,
}

/// What the executor did with a range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeletionSummary {
    /// Sub-windows deleted (or that would have been, in a dry run)
    pub windows_deleted: usize,
    /// Sub-windows left intact because a non-zero value was seen
    pub windows_skipped: usize,
    pub dry_run: bool,
}

/// Act on `range` for `metric`, one breadth-wide sub-window at a time.
///
/// The first failed call aborts the remaining sub-windows. Sub-windows
/// already deleted stay deleted.
pub async fn execute(
    ctx: &RunContext,
    metric: &str,
    range: DayRange,
    mode: DeleteMode,
) -> Result<DeletionSummary> {
    info!(
        metric = %metric,
        range = %range,
        mode = ?mode,
        dry_run = ctx.dry_run,
        "Deleting datapoints"
    );

    let mut summary = DeletionSummary {
        dry_run: ctx.dry_run,
        ..DeletionSummary::default()
    };

    for (start, end) in range.windows(ctx.settings.breadth) {
        match mode {
            DeleteMode::Unconditional => {
                delete_window(ctx, metric, start, end).await?;
                summary.windows_deleted += 1;
            }
            DeleteMode::ZeroOnlyVerify => {
                if window_is_all_zero(ctx, metric, start, end).await? {
                    delete_window(ctx, metric, start, end).await?;
                    summary.windows_deleted += 1;
                } else {
                    debug!(metric = %metric, start = %start, end = %end, "Non-zero values present, skipping");
                    summary.windows_skipped += 1;
                }
            }
        }
    }

    Ok(summary)
}

async fn delete_window(
    ctx: &RunContext,
    metric: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<()> {
    let request = QueryRequest::new(start, end, vec![Query::sum(metric)]);
    if ctx.dry_run {
        info!(request = %request, "Dry run, not deleting");
        return Ok(());
    }
    debug!(request = %request, "Delete");
    ctx.store.delete(&request).await
}

async fn window_is_all_zero(
    ctx: &RunContext,
    metric: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<bool> {
    // max of maxima and min of minima, so series of opposite sign cannot cancel
    let request = QueryRequest::new(
        start,
        end,
        vec![
            Query::new(metric, "max").downsample(Downsample::daily(DownsampleFn::Max)),
            Query::new(metric, "min").downsample(Downsample::daily(DownsampleFn::Min)),
        ],
    );
    debug!(request = %request, "Zero check");
    let response = ctx.store.query(&request).await?;
    Ok(all_zero(&response))
}

/// True when every value of every series is exactly zero.
fn all_zero(response: &[SeriesResult]) -> bool {
    response
        .iter()
        .flat_map(|series| series.dps.values())
        .all(|v| *v == 0.0)
}

//! Aggregation - folds windowed count queries into a day histogram

use crate::error::Result;
use crate::models::{Day, Metric, TimeWindows};
use crate::state::RunContext;
use crate::tsdb::{Downsample, DownsampleFn, Query, QueryRequest};
use tracing::{debug, info};

/// Build `metric`'s day histogram over `[look_back, horizon)`.
///
/// Issues one `1d-count` query per breadth-wide window. Any failed window
/// aborts the whole aggregation; a failed window is never read as "no data".
/// Returns the number of day buckets populated, zero meaning no data in range.
pub async fn aggregate(
    ctx: &RunContext,
    metric: &mut Metric,
    look_back: Day,
    horizon: Day,
) -> Result<usize> {
    info!(
        metric = %metric.name,
        start = %look_back,
        end = %horizon,
        "Gathering datapoint counts"
    );

    let query = Query::sum(&metric.name).downsample(Downsample::daily(DownsampleFn::Count));
    let windows = TimeWindows::new(look_back.start(), horizon.start(), ctx.settings.breadth);

    let mut windows_queried = 0;
    for (start, end) in windows {
        let request = QueryRequest::new(start, end, vec![query.clone()]);
        debug!(request = %request, "Count query");

        let response = ctx.store.query(&request).await?;
        for series in &response {
            metric.activity.fold(&series.dps)?;
            metric
                .tag_keys
                .extend(series.aggregate_tags.iter().cloned());
        }
        windows_queried += 1;
    }

    debug!(
        metric = %metric.name,
        windows = windows_queried,
        days = metric.activity.len(),
        tag_keys = metric.tag_keys.len(),
        "Aggregation complete"
    );
    Ok(metric.activity.len())
}

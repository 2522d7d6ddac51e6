//! Retention - decides which days of a metric may go and drives the run

use crate::catalog::MetricCatalog;
use crate::error::Result;
use crate::models::{Activity, Day, DayRange, Metric};
use crate::rules::{match_rules, RetentionRule};
use crate::state::RunContext;
use crate::summary::RunSummary;
use crate::tasks::aggregation::aggregate;
use crate::tasks::deletion::{execute, DeleteMode, DeletionSummary};
use crate::tasks::tag_sets::{collect, TagCollection};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

/// Day boundaries for one (metric, rule) evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionWindow {
    pub look_back: Day,
    pub expire: Day,
    pub cooldown: Option<Day>,
}

impl RetentionWindow {
    pub fn new(now: DateTime<Utc>, look_back: TimeDelta, rule: &RetentionRule) -> Self {
        Self {
            look_back: Day::before(now, look_back),
            expire: Day::before(now, rule.expire),
            cooldown: rule.cooldown.map(|c| Day::before(now, c)),
        }
    }

    /// Exclusive end of the aggregation window. A cooldown boundary later
    /// than the expiry boundary extends it.
    pub fn upper_bound(&self) -> Day {
        match self.cooldown {
            Some(cooldown) => cooldown.max(self.expire),
            None => self.expire,
        }
    }

    /// Exclusive end of anything that may be deleted. Never inside the
    /// cooldown window.
    pub fn delete_bound(&self) -> Day {
        match self.cooldown {
            Some(cooldown) => cooldown.min(self.expire),
            None => self.expire,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No datapoints in the aggregation window
    NoData,
    /// Data exists but none of it is old enough
    NothingEligible,
    Delete { range: DayRange, mode: DeleteMode },
}

/// Result of evaluating a rule against a histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub oldest: Option<Day>,
    pub newest: Option<Day>,
    /// The newest active day is inside the cooldown window. Informational:
    /// older days are still deleted.
    pub within_cooldown: bool,
    pub verdict: Verdict,
}

/// Compute the delete range for a histogram. Pure, so the same histogram
/// always yields the same decision.
pub fn decide(activity: &Activity, window: &RetentionWindow, zero_only: bool) -> Decision {
    let (oldest, newest) = match (activity.oldest_day(), activity.newest_day()) {
        (Some(oldest), Some(newest)) => (oldest, newest),
        _ => {
            return Decision {
                oldest: None,
                newest: None,
                within_cooldown: false,
                verdict: Verdict::NoData,
            }
        }
    };

    let within_cooldown = window.cooldown.map_or(false, |c| newest > c);

    // the newest active day is a whole bucket, so the range runs through it
    let range = DayRange::new(oldest, newest.next().min(window.delete_bound()));
    let verdict = if range.is_empty() {
        Verdict::NothingEligible
    } else {
        let mode = if zero_only {
            DeleteMode::ZeroOnlyVerify
        } else {
            DeleteMode::Unconditional
        };
        Verdict::Delete { range, mode }
    };

    Decision {
        oldest: Some(oldest),
        newest: Some(newest),
        within_cooldown,
        verdict,
    }
}

/// What happened when one rule was applied to one metric.
#[derive(Debug, Clone)]
pub struct RuleReport {
    pub rule: usize,
    pub decision: Decision,
    pub tags: Option<TagCollection>,
    pub deletion: Option<DeletionSummary>,
}

/// Aggregate, decide and delete for one (metric, rule) pair.
///
/// The histogram is built fresh for this pair and dropped afterwards.
pub async fn apply_rule(ctx: &RunContext, name: &str, rule: &RetentionRule) -> Result<RuleReport> {
    let window = RetentionWindow::new(ctx.now, ctx.settings.look_back, rule);
    let mut metric = Metric::new(name);

    aggregate(ctx, &mut metric, window.look_back, window.upper_bound()).await?;

    let tags = if ctx.settings.collect_tags && !metric.activity.is_empty() {
        let outcome = collect(ctx, &mut metric).await;
        for series in metric.tag_series.values() {
            debug!(
                metric = %name,
                tags = %series.tags,
                oldest = ?series.activity.oldest_day().map(|d| d.to_string()),
                newest = ?series.activity.newest_day().map(|d| d.to_string()),
                "Tag series activity"
            );
        }
        Some(outcome)
    } else {
        None
    };

    let decision = decide(&metric.activity, &window, rule.zero_only);
    let mut report = RuleReport {
        rule: rule.index,
        decision,
        tags,
        deletion: None,
    };

    if decision.within_cooldown {
        info!(metric = %name, rule = rule.index, "Metric has data within cooldown");
    }

    match decision.verdict {
        Verdict::NoData => {
            info!(
                metric = %name,
                rule = rule.index,
                start = %window.look_back,
                end = %window.upper_bound(),
                "No datapoints found, skipping"
            );
        }
        Verdict::NothingEligible => {
            info!(
                metric = %name,
                rule = rule.index,
                oldest = ?decision.oldest.map(|d| d.to_string()),
                bound = %window.delete_bound(),
                "Nothing old enough to delete"
            );
        }
        Verdict::Delete { range, mode } => {
            report.deletion = Some(execute(ctx, name, range, mode).await?);
        }
    }

    Ok(report)
}

/// Run every applicable rule against every metric in the catalog.
///
/// A failed catalog listing ends the run. A query failure abandons the
/// rest of that metric's rules and moves on to the next metric.
pub async fn run(
    ctx: &RunContext,
    catalog: &dyn MetricCatalog,
    rules: &[RetentionRule],
) -> Result<RunSummary> {
    let span = info_span!("run", run_id = %Uuid::new_v4());
    async move {
        let metrics = catalog.list_metrics().await?;
        info!(metrics = metrics.len(), rules = rules.len(), now = %ctx.now, "Retention run started");

        let mut summary = RunSummary::new();
        summary.metrics_total = metrics.len() as u64;

        for name in &metrics {
            let applicable = match_rules(name, rules);
            if applicable.is_empty() {
                continue;
            }
            summary.metrics_matched += 1;

            for rule in applicable {
                summary.rules_applied += 1;
                match apply_rule(ctx, name, rule).await {
                    Ok(report) => tally(&mut summary, &report),
                    Err(e) => {
                        error!(error = %e, metric = %name, rule = rule.index, "Retention failed for metric");
                        summary.metrics_failed += 1;
                        break;
                    }
                }
            }
        }

        summary.log(ctx.dry_run);
        Ok(summary)
    }
    .instrument(span)
    .await
}

fn tally(summary: &mut RunSummary, report: &RuleReport) {
    if report.decision.within_cooldown {
        summary.within_cooldown += 1;
    }
    match report.decision.verdict {
        Verdict::NoData => summary.no_data += 1,
        Verdict::NothingEligible => summary.nothing_eligible += 1,
        Verdict::Delete { .. } => {}
    }
    if let Some(deletion) = &report.deletion {
        summary.add_deletion(deletion);
    }
}

//! Per-run counters reported when a retention pass finishes

use crate::tasks::deletion::DeletionSummary;
use serde::Serialize;
use tracing::info;

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Metrics returned by the catalog
    pub metrics_total: u64,
    /// Metrics matched by at least one rule
    pub metrics_matched: u64,
    /// (metric, rule) pairs evaluated
    pub rules_applied: u64,
    /// Pairs with no datapoints in the aggregation window
    pub no_data: u64,
    /// Pairs with data but nothing old enough to delete
    pub nothing_eligible: u64,
    /// Pairs whose newest data falls inside the cooldown window
    pub within_cooldown: u64,
    /// Pairs that produced a delete range
    pub ranges_deleted: u64,
    pub windows_deleted: u64,
    pub windows_skipped: u64,
    /// Metrics whose processing was aborted by a query failure
    pub metrics_failed: u64,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_deletion(&mut self, deletion: &DeletionSummary) {
        self.ranges_deleted += 1;
        self.windows_deleted += deletion.windows_deleted as u64;
        self.windows_skipped += deletion.windows_skipped as u64;
    }

    /// Whether any metric failed during the run.
    pub fn has_failures(&self) -> bool {
        self.metrics_failed > 0
    }

    pub fn log(&self, dry_run: bool) {
        info!(
            metrics_total = self.metrics_total,
            metrics_matched = self.metrics_matched,
            rules_applied = self.rules_applied,
            no_data = self.no_data,
            nothing_eligible = self.nothing_eligible,
            within_cooldown = self.within_cooldown,
            ranges_deleted = self.ranges_deleted,
            windows_deleted = self.windows_deleted,
            windows_skipped = self.windows_skipped,
            metrics_failed = self.metrics_failed,
            dry_run,
            "Retention run finished"
        );
    }
}

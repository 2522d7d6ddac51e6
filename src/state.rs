//! Run state shared by every stage of one retention pass

use crate::config::Settings;
use crate::tsdb::TimeSeriesStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Everything a retention pass reads but never mutates.
#[derive(Clone)]
pub struct RunContext {
    /// Remote time-series store
    pub store: Arc<dyn TimeSeriesStore>,
    /// Engine settings from configuration
    pub settings: Settings,
    /// Reference instant, fixed for the whole run
    pub now: DateTime<Utc>,
    /// Log deletions instead of issuing them
    pub dry_run: bool,
}

impl RunContext {
    /// Create a run context anchored at the current time.
    ///
    /// # Arguments
    /// * `store` - Store to query and delete from
    /// * `settings` - Look-back, breadth and tag collection parameters
    /// * `dry_run` - When set, delete requests are only logged
    pub fn new(store: Arc<dyn TimeSeriesStore>, settings: Settings, dry_run: bool) -> Self {
        Self::at(store, settings, dry_run, Utc::now())
    }

    /// Create a run context anchored at `now`.
    pub fn at(
        store: Arc<dyn TimeSeriesStore>,
        settings: Settings,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            settings,
            now,
            dry_run,
        }
    }
}

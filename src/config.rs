//! TOML configuration: engine settings, store, catalog and retention rules

use crate::catalog::CatalogConfig;
use crate::error::{ExpireError, Result};
use crate::rules::{to_delta, RetentionRule};
use crate::tsdb::StoreConfig;
use chrono::TimeDelta;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default width of one query/delete sub-window.
pub const DEFAULT_BREADTH: Duration = Duration::from_secs(6 * 3600);

/// Default accumulated datapoint count that triggers a tag-enumeration batch.
pub const DEFAULT_TAG_BATCH_THRESHOLD: i64 = 10_000_000;

/// The configuration file as written on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    /// How far back to look for data
    #[serde(with = "humantime_serde")]
    pub look_back: Duration,

    /// Width of each query/delete sub-window
    #[serde(with = "humantime_serde", default = "default_breadth")]
    pub breadth: Duration,

    /// Enumerate tag combinations for each processed metric
    #[serde(default)]
    pub collect_tags: bool,

    #[serde(default = "default_tag_batch_threshold")]
    pub tag_batch_threshold: i64,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleConfig>,
}

fn default_breadth() -> Duration {
    DEFAULT_BREADTH
}

fn default_tag_batch_threshold() -> i64 {
    DEFAULT_TAG_BATCH_THRESHOLD
}

/// One `[[rule]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    /// Glob patterns matched against metric names
    pub metrics: Vec<String>,

    #[serde(with = "humantime_serde")]
    pub expire: Duration,

    #[serde(with = "humantime_serde", default)]
    pub cooldown: Option<Duration>,

    #[serde(default)]
    pub zero_only: bool,
}

/// Engine parameters that apply to every rule.
#[derive(Debug, Clone)]
pub struct Settings {
    pub look_back: TimeDelta,
    pub breadth: TimeDelta,
    pub collect_tags: bool,
    pub tag_batch_threshold: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            look_back: TimeDelta::days(30),
            breadth: TimeDelta::hours(6),
            collect_tags: false,
            tag_batch_threshold: DEFAULT_TAG_BATCH_THRESHOLD,
        }
    }
}

/// Validated configuration with compiled rules.
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    pub store: StoreConfig,
    pub catalog: CatalogConfig,
    pub rules: Vec<RetentionRule>,
}

impl Config {
    /// Read, parse and compile a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path).map_err(|e| {
            ExpireError::ConfigurationFailure(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&body)?;
        info!(
            path = %path.display(),
            rules = config.rules.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse and compile configuration text.
    pub fn parse(body: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(body)?;
        file.compile()
    }
}

impl ConfigFile {
    /// Validate durations and compile every rule's patterns.
    ///
    /// Fails on the first invalid rule; a partial rule set is never returned.
    pub fn compile(self) -> Result<Config> {
        if self.look_back.is_zero() {
            return Err(ExpireError::ConfigurationFailure(
                "look_back must be positive".into(),
            ));
        }
        if self.breadth.is_zero() {
            return Err(ExpireError::ConfigurationFailure(
                "breadth must be positive".into(),
            ));
        }
        if self.tag_batch_threshold <= 0 {
            return Err(ExpireError::ConfigurationFailure(format!(
                "tag_batch_threshold must be positive, got {}",
                self.tag_batch_threshold
            )));
        }

        let rules = self
            .rules
            .iter()
            .enumerate()
            .map(|(i, r)| RetentionRule::new(i, &r.metrics, r.expire, r.cooldown, r.zero_only))
            .collect::<Result<Vec<_>>>()?;

        for rule in rules.iter().filter(|r| r.patterns().next().is_none()) {
            warn!(rule = rule.index, "Rule has no metric patterns and will never match");
        }

        Ok(Config {
            settings: Settings {
                look_back: to_delta(self.look_back)?,
                breadth: to_delta(self.breadth)?,
                collect_tags: self.collect_tags,
                tag_batch_threshold: self.tag_batch_threshold,
            },
            store: self.store,
            catalog: self.catalog,
            rules,
        })
    }
}

//! Retention rules and glob matching of metric names

use crate::error::{ExpireError, Result};
use chrono::TimeDelta;
use glob::{MatchOptions, Pattern};
use std::time::Duration;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled retention rule.
#[derive(Debug, Clone)]
pub struct RetentionRule {
    /// Position in the configuration, used in log lines
    pub index: usize,
    patterns: Vec<Pattern>,
    /// Data older than `now - expire` may be deleted
    pub expire: TimeDelta,
    /// Days newer than `now - cooldown` are never deleted
    pub cooldown: Option<TimeDelta>,
    /// Delete only sub-windows whose values are all zero
    pub zero_only: bool,
}

impl RetentionRule {
    /// Compile a rule. Any malformed pattern fails the whole rule.
    pub fn new(
        index: usize,
        patterns: &[String],
        expire: Duration,
        cooldown: Option<Duration>,
        zero_only: bool,
    ) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let expire = to_delta(expire)?;
        if expire <= TimeDelta::zero() {
            return Err(ExpireError::ConfigurationFailure(format!(
                "rule {} has a zero expiry",
                index
            )));
        }
        let cooldown = match cooldown {
            Some(d) if !d.is_zero() => Some(to_delta(d)?),
            _ => None,
        };

        Ok(Self {
            index,
            patterns,
            expire,
            cooldown,
            zero_only,
        })
    }

    /// True when any pattern matches the metric name.
    pub fn matches(&self, metric: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(metric, MATCH_OPTIONS))
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.as_str())
    }
}

pub(crate) fn to_delta(duration: Duration) -> Result<TimeDelta> {
    TimeDelta::from_std(duration).map_err(|_| {
        ExpireError::ConfigurationFailure(format!(
            "duration {} is out of range",
            humantime::format_duration(duration)
        ))
    })
}

/// All rules that apply to `metric`, in configuration order.
pub fn match_rules<'a>(metric: &str, rules: &'a [RetentionRule]) -> Vec<&'a RetentionRule> {
    rules.iter().filter(|r| r.matches(metric)).collect()
}

//! Metric enumeration

use crate::error::{ExpireError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

/// Source of the names of every metric known to the store.
#[async_trait]
pub trait MetricCatalog: Send + Sync {
    async fn list_metrics(&self) -> Result<Vec<String>>;
}

/// How metric names are enumerated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Program and arguments whose output lists metric UIDs
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Fixed metric list; when set the command is not run
    #[serde(default)]
    pub metrics: Option<Vec<String>>,
}

fn default_command() -> Vec<String> {
    ["tsdb", "uid", "grep", "metrics", "."]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            metrics: None,
        }
    }
}

impl CatalogConfig {
    /// Build the catalog this configuration describes.
    pub fn build(&self) -> Result<Box<dyn MetricCatalog>> {
        if let Some(metrics) = &self.metrics {
            return Ok(Box::new(StaticCatalog::new(metrics.clone())));
        }
        Ok(Box::new(UidCommand::new(&self.command)?))
    }
}

/// Runs `tsdb uid grep metrics .` (or a configured equivalent).
#[derive(Debug, Clone)]
pub struct UidCommand {
    program: String,
    args: Vec<String>,
}

impl UidCommand {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command.split_first().ok_or_else(|| {
            ExpireError::ConfigurationFailure("catalog command must not be empty".into())
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl MetricCatalog for UidCommand {
    async fn list_metrics(&self) -> Result<Vec<String>> {
        debug!(program = %self.program, args = ?self.args, "Listing metrics");
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| {
                ExpireError::EnumerationFailure(format!("Failed to run {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            return Err(ExpireError::EnumerationFailure(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let metrics = parse_uid_output(&String::from_utf8_lossy(&output.stdout));
        info!(count = metrics.len(), "Metrics enumerated");
        Ok(metrics)
    }
}

/// Extract metric names from `tsdb uid grep` output.
///
/// Lines look like `metrics win.system.handle_count: [0, 3, 109]`; anything
/// not starting with `metrics ` is ignored.
pub fn parse_uid_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix("metrics "))
        .filter_map(|rest| rest.split(':').next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// A fixed list of metric names.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    metrics: Vec<String>,
}

impl StaticCatalog {
    pub fn new(metrics: Vec<String>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl MetricCatalog for StaticCatalog {
    async fn list_metrics(&self) -> Result<Vec<String>> {
        Ok(self.metrics.clone())
    }
}

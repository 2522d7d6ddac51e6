//! Time-series store access: request shapes, the store trait and the
//! OpenTSDB HTTP client

use crate::error::{ExpireError, Result};
use crate::models::TagSet;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Per-bucket reduction applied by a downsample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownsampleFn {
    Count,
    Sum,
    Max,
    Min,
}

impl DownsampleFn {
    fn as_str(&self) -> &'static str {
        match self {
            DownsampleFn::Count => "count",
            DownsampleFn::Sum => "sum",
            DownsampleFn::Max => "max",
            DownsampleFn::Min => "min",
        }
    }
}

/// A downsample directive such as `1d-count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downsample {
    pub period: String,
    pub function: DownsampleFn,
}

impl Downsample {
    /// One bucket per day.
    pub fn daily(function: DownsampleFn) -> Self {
        Self {
            period: "1d".to_string(),
            function,
        }
    }
}

impl fmt::Display for Downsample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.period, self.function.as_str())
    }
}

/// One sub-query of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub metric: String,
    pub aggregator: String,
    pub downsample: Option<Downsample>,
    /// Tag filter; `*` matches every value of a key
    pub tags: TagSet,
}

impl Query {
    /// A query over the whole metric, combining series with `aggregator`.
    pub fn new(metric: &str, aggregator: &str) -> Self {
        Self {
            metric: metric.to_string(),
            aggregator: aggregator.to_string(),
            downsample: None,
            tags: TagSet::default(),
        }
    }

    /// A `sum` query over the whole metric.
    pub fn sum(metric: &str) -> Self {
        Self::new(metric, "sum")
    }

    pub fn downsample(mut self, downsample: Downsample) -> Self {
        self.downsample = Some(downsample);
        self
    }

    pub fn tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }
}

/// A query or delete request over `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub queries: Vec<Query>,
}

impl QueryRequest {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, queries: Vec<Query>) -> Self {
        Self {
            start,
            end,
            queries,
        }
    }
}

impl fmt::Display for QueryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start.to_rfc3339(), self.end.to_rfc3339())?;
        for q in &self.queries {
            write!(f, " {}:{}", q.aggregator, q.metric)?;
            if let Some(ds) = &q.downsample {
                write!(f, ":{}", ds)?;
            }
            if !q.tags.is_empty() {
                write!(f, "{}", q.tags)?;
            }
        }
        Ok(())
    }
}

/// One series of a query response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeriesResult {
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub tags: TagSet,
    /// Tag keys that were aggregated away
    #[serde(default, rename = "aggregateTags")]
    pub aggregate_tags: Vec<String>,
    /// Unix-seconds timestamp string to value
    #[serde(default)]
    pub dps: BTreeMap<String, f64>,
}

/// The remote store as seen by the retention engine.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Return the series matching the request.
    async fn query(&self, request: &QueryRequest) -> Result<Vec<SeriesResult>>;

    /// Delete every raw datapoint matching the request.
    async fn delete(&self, request: &QueryRequest) -> Result<()>;
}

/// Connection settings for [`OpenTsdb`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

fn default_url() -> String {
    "http://localhost:4242".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    start: i64,
    end: i64,
    queries: Vec<WireQuery<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    delete: bool,
}

#[derive(Debug, Serialize)]
struct WireQuery<'a> {
    metric: &'a str,
    aggregator: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    downsample: Option<String>,
    #[serde(skip_serializing_if = "no_tags")]
    tags: &'a BTreeMap<String, String>,
}

fn no_tags(tags: &&BTreeMap<String, String>) -> bool {
    tags.is_empty()
}

impl<'a> WireRequest<'a> {
    fn new(request: &'a QueryRequest, delete: bool) -> Self {
        // OpenTSDB treats `end` as inclusive
        let end = request.end.timestamp().saturating_sub(1).max(request.start.timestamp());
        Self {
            start: request.start.timestamp(),
            end,
            queries: request
                .queries
                .iter()
                .map(|q| WireQuery {
                    metric: &q.metric,
                    aggregator: &q.aggregator,
                    downsample: q.downsample.as_ref().map(|d| d.to_string()),
                    tags: q.tags.as_map(),
                })
                .collect(),
            delete,
        }
    }
}

/// HTTP client for the OpenTSDB `/api/query` endpoint.
#[derive(Clone)]
pub struct OpenTsdb {
    client: Client,
    base_url: String,
}

impl OpenTsdb {
    /// Create a client for the store at `config.url`.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ExpireError::ConfigurationFailure(format!("Failed to create HTTP client: {}", e))
            })?;

        info!(url = %config.url, "OpenTSDB client configured");
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, request: &QueryRequest, delete: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/query", self.base_url);
        let body = WireRequest::new(request, delete);
        debug!(body = ?body, "OpenTSDB request");

        let response = self.client.post(&url).json(&body).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ExpireError::QueryFailure(format!(
                "OpenTSDB error ({}) for {}: {}",
                status, request, body
            )))
        }
    }
}

#[async_trait]
impl TimeSeriesStore for OpenTsdb {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<SeriesResult>> {
        let response = self.post(request, false).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn delete(&self, request: &QueryRequest) -> Result<()> {
        self.post(request, true).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn request() -> QueryRequest {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();
        QueryRequest::new(
            start,
            end,
            vec![Query::sum("app.requests").downsample(Downsample::daily(DownsampleFn::Count))],
        )
    }

    #[test]
    fn test_wire_body_for_count_query() {
        let req = request();
        let body = serde_json::to_value(WireRequest::new(&req, false)).unwrap();
        assert_eq!(
            body,
            json!({
                "start": 1709251200,
                "end": 1709251200 + 6 * 3600 - 1,
                "queries": [{
                    "metric": "app.requests",
                    "aggregator": "sum",
                    "downsample": "1d-count",
                }],
            })
        );
    }

    #[test]
    fn test_wire_body_for_delete_with_tags() {
        let mut req = request();
        let keys = vec!["host".to_string()];
        req.queries = vec![Query::sum("app.requests").tags(TagSet::wildcard(&keys))];
        let body = serde_json::to_value(WireRequest::new(&req, true)).unwrap();
        assert_eq!(body["delete"], json!(true));
        assert_eq!(body["queries"][0]["tags"], json!({"host": "*"}));
        assert!(body["queries"][0].get("downsample").is_none());
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"[{
            "metric": "app.requests",
            "tags": {"host": "web01"},
            "aggregateTags": ["dc"],
            "dps": {"1709251200": 42, "1709337600": 0.5}
        }]"#;
        let series: Vec<SeriesResult> = serde_json::from_str(raw).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].tags.to_string(), "{host=web01}");
        assert_eq!(series[0].aggregate_tags, vec!["dc".to_string()]);
        assert_eq!(series[0].dps["1709251200"], 42.0);
    }

    #[test]
    fn test_downsample_display() {
        assert_eq!(Downsample::daily(DownsampleFn::Max).to_string(), "1d-max");
        assert_eq!(Downsample::daily(DownsampleFn::Min).to_string(), "1d-min");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let config = StoreConfig {
            url: "http://tsdb:4242/".to_string(),
            timeout: Duration::from_secs(5),
        };
        let client = OpenTsdb::new(&config).unwrap();
        assert_eq!(client.base_url, "http://tsdb:4242");
    }
}

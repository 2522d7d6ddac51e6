//! Error types for the retention engine and its collaborators

use thiserror::Error;

/// Errors raised while expiring data.
///
/// Only `EnumerationFailure` and `ConfigurationFailure` end a run. A
/// `QueryFailure` is scoped to the metric being processed.
#[derive(Debug, Error)]
pub enum ExpireError {
    #[error("Metric enumeration failed: {0}")]
    EnumerationFailure(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationFailure(String),

    #[error("Query failed: {0}")]
    QueryFailure(String),
}

impl ExpireError {
    /// Whether this error must terminate the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExpireError::EnumerationFailure(_) | ExpireError::ConfigurationFailure(_)
        )
    }
}

/// Result type alias using ExpireError
pub type Result<T> = std::result::Result<T, ExpireError>;

impl From<reqwest::Error> for ExpireError {
    fn from(err: reqwest::Error) -> Self {
        ExpireError::QueryFailure(err.to_string())
    }
}

impl From<serde_json::Error> for ExpireError {
    fn from(err: serde_json::Error) -> Self {
        ExpireError::QueryFailure(format!("malformed response: {}", err))
    }
}

impl From<toml::de::Error> for ExpireError {
    fn from(err: toml::de::Error) -> Self {
        ExpireError::ConfigurationFailure(err.to_string())
    }
}

impl From<glob::PatternError> for ExpireError {
    fn from(err: glob::PatternError) -> Self {
        ExpireError::ConfigurationFailure(format!("invalid metric pattern: {}", err))
    }
}

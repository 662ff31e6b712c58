//! Configuration
//!
//! Loaded from YAML, then overridden by `FRAUDGRAPH_*` environment variables.
//! Every section has defaults, so an empty file (or no file) is valid.
//!
//! ```yaml
//! store:
//!   uri: http://localhost:7474
//!   user: neo4j
//!   password: secret
//!   database: neo4j
//! loader:
//!   chunk_size: 1000
//!   write_concurrency: 1
//!   duplicate_policy: reject
//!   period: week
//!   retry:
//!     max_attempts: 3
//!     backoff_ms: 250
//! queries:
//!   start_date: 2018-06-01
//!   end_date: 2018-07-01
//!   limit: 10
//!   degree: 4
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use crate::error::{FraudGraphError, Result};
use crate::model::PeriodGranularity;
use crate::query::params::{DateWindow, Degree, Limit};

pub const ENV_URI: &str = "FRAUDGRAPH_URI";
pub const ENV_USER: &str = "FRAUDGRAPH_USER";
pub const ENV_PASSWORD: &str = "FRAUDGRAPH_PASSWORD";
pub const ENV_DATABASE: &str = "FRAUDGRAPH_DATABASE";
pub const ENV_CHUNK_SIZE: &str = "FRAUDGRAPH_CHUNK_SIZE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub loader: LoaderConfig,
    pub queries: QueryDefaults,
}

/// Connection settings for the HTTP store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub uri: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost:7474".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
            timeout_secs: 60,
        }
    }
}

/// What to do when an entity table repeats an id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Create one node per row, duplicates included
    #[default]
    Allow,
    /// Fail with `DuplicateEntityId` before writing anything
    Reject,
}

/// Resubmission of chunks that failed with a transient error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per chunk; 1 means no retry
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt number `attempt` (1-based), doubling each time
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(1u64 << exponent))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Transaction rows per write transaction
    pub chunk_size: usize,
    /// Chunks in flight at once; 1 submits sequentially
    pub write_concurrency: usize,
    pub duplicate_policy: DuplicatePolicy,
    pub period: PeriodGranularity,
    pub retry: RetryPolicy,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            write_concurrency: 1,
            duplicate_policy: DuplicatePolicy::default(),
            period: PeriodGranularity::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl LoaderConfig {
    pub fn chunk_size(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.chunk_size)
            .ok_or_else(|| FraudGraphError::Config("chunk_size must be at least 1".to_string()))
    }
}

/// Default query parameters, copied into each invocation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDefaults {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub limit: i64,
    /// Co-occurrence degree `k`
    pub degree: i64,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::from_ymd_opt(2018, 6, 1).unwrap_or(NaiveDate::MIN),
            end_date: NaiveDate::from_ymd_opt(2018, 7, 1).unwrap_or(NaiveDate::MIN),
            limit: 10,
            degree: 4,
        }
    }
}

impl Config {
    /// Read a YAML file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML file only. Callers layering further overrides on top
    /// validate once they are done.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source. Unparseable chunk sizes
    /// become 0 so `validate` reports them.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup(ENV_URI) {
            self.store.uri = uri;
        }
        if let Some(user) = lookup(ENV_USER) {
            self.store.user = user;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.store.password = password;
        }
        if let Some(database) = lookup(ENV_DATABASE) {
            self.store.database = database;
        }
        if let Some(size) = lookup(ENV_CHUNK_SIZE) {
            self.loader.chunk_size = size.trim().parse().unwrap_or(0);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.loader.chunk_size()?;
        if self.loader.write_concurrency == 0 {
            return Err(FraudGraphError::Config(
                "write_concurrency must be at least 1".to_string(),
            ));
        }
        if self.loader.retry.max_attempts == 0 {
            return Err(FraudGraphError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.store.database.is_empty() {
            return Err(FraudGraphError::Config("database name is empty".to_string()));
        }
        if !(self.store.uri.starts_with("http://") || self.store.uri.starts_with("https://")) {
            return Err(FraudGraphError::Config(format!(
                "store uri must be http(s), got {}",
                self.store.uri
            )));
        }

        DateWindow::new(self.queries.start_date, self.queries.end_date)
            .and_then(|_| Limit::new(self.queries.limit))
            .and_then(|_| Degree::new(self.queries.degree))
            .map_err(|e| FraudGraphError::Config(format!("query defaults: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.uri, "http://localhost:7474");
        assert_eq!(config.loader.chunk_size, 1000);
        assert_eq!(config.loader.duplicate_policy, DuplicatePolicy::Allow);
        assert_eq!(config.queries.limit, 10);
        assert_eq!(config.queries.degree, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let config = Config::from_yaml(
            "loader:\n  chunk_size: 250\n  duplicate_policy: reject\n  period: month\nqueries:\n  limit: 5\n",
        )
        .unwrap();
        assert_eq!(config.loader.chunk_size, 250);
        assert_eq!(config.loader.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.loader.period, PeriodGranularity::Month);
        assert_eq!(config.loader.write_concurrency, 1);
        assert_eq!(config.queries.limit, 5);
        assert_eq!(config.queries.degree, 4);
        assert_eq!(config.store.database, "neo4j");
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = Config::from_yaml("loader:\n  chunk_size: 0\n").unwrap();
        assert!(matches!(config.validate(), Err(FraudGraphError::Config(_))));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_URI, "https://graph.internal:7473"),
            (ENV_DATABASE, "fraud"),
            (ENV_CHUNK_SIZE, "64"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.store.uri, "https://graph.internal:7473");
        assert_eq!(config.store.database, "fraud");
        assert_eq!(config.store.user, "neo4j");
        assert_eq!(config.loader.chunk_size, 64);
        assert!(config.validate().is_ok());

        config.apply_overrides(|name| (name == ENV_CHUNK_SIZE).then(|| "many".to_string()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_query_defaults() {
        let config = Config::from_yaml("queries:\n  start_date: 2018-07-01\n  end_date: 2018-06-01\n").unwrap();
        assert!(matches!(config.validate(), Err(FraudGraphError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "store:\n  database: payments\n  timeout_secs: 5").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.store.database, "payments");
        assert_eq!(config.store.timeout_secs, 5);
    }

    #[test]
    fn test_read_leaves_validation_to_caller() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "loader:\n  chunk_size: 0").unwrap();
        let mut config = Config::read(file.path()).unwrap();
        assert!(config.validate().is_err());

        config.apply_overrides(|name| (name == ENV_CHUNK_SIZE).then(|| "lots".to_string()));
        config.loader.chunk_size = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let retry = RetryPolicy {
            max_attempts: 3,
            backoff_ms: 100,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
    }
}

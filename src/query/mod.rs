//! Analytical queries over the payment graph
//!
//! Four fixed query shapes, each executed in its own read transaction:
//!
//! 1. customer payments per day within a date window
//! 2. terminals with transactions above 1.5× their 30-day baseline average
//! 3. customer pairs linked by a path of exactly `4k + 4` relationships
//! 4. flagged-transaction counts per period against the period's total
//!
//! Parameters are validated before anything reaches the store.

pub mod params;
pub mod results;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::QueryDefaults;
use crate::cypher::Statement;
use crate::error::{FraudGraphError, Result};
use crate::store::{run_read, GraphStore};

pub use params::{DateWindow, Degree, Limit};
pub use results::{
    decode_all, CoCustomerPair, CustomerPayment, FromRow, PeriodFraudRate, QueryOutput,
    TerminalAnomaly,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryKind {
    CustomerPayments,
    TerminalAnomalies,
    CoCustomers,
    PeriodFraudRates,
}

impl QueryKind {
    pub const ALL: [QueryKind; 4] = [
        QueryKind::CustomerPayments,
        QueryKind::TerminalAnomalies,
        QueryKind::CoCustomers,
        QueryKind::PeriodFraudRates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::CustomerPayments => "customer-payments",
            QueryKind::TerminalAnomalies => "terminal-anomalies",
            QueryKind::CoCustomers => "co-customers",
            QueryKind::PeriodFraudRates => "period-fraud-rates",
        }
    }

    /// 1-based position in the query family
    pub fn number(&self) -> usize {
        match self {
            QueryKind::CustomerPayments => 1,
            QueryKind::TerminalAnomalies => 2,
            QueryKind::CoCustomers => 3,
            QueryKind::PeriodFraudRates => 4,
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryKind {
    type Err = String;

    /// Accepts the kebab-case name or the query number
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        QueryKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.number().to_string() == s)
            .ok_or_else(|| {
                format!(
                    "unknown query `{}`, expected 1-4 or one of: {}",
                    s,
                    QueryKind::ALL.map(|k| k.as_str()).join(", ")
                )
            })
    }
}

/// Per-invocation overrides; unset fields fall back to `QueryDefaults`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: Option<i64>,
    /// Co-occurrence degree `k`
    pub degree: Option<i64>,
}

impl QueryOptions {
    fn window(&self, defaults: &QueryDefaults) -> Result<DateWindow> {
        DateWindow::new(
            self.start_date.unwrap_or(defaults.start_date),
            self.end_date.unwrap_or(defaults.end_date),
        )
    }

    fn limit(&self, defaults: &QueryDefaults) -> Result<Limit> {
        Limit::new(self.limit.unwrap_or(defaults.limit))
    }

    fn degree(&self, defaults: &QueryDefaults) -> Result<Degree> {
        Degree::new(self.degree.unwrap_or(defaults.degree))
    }
}

/// Node and relationship counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphCounts {
    pub nodes: BTreeMap<String, u64>,
    pub relationships: BTreeMap<String, u64>,
}

impl GraphCounts {
    pub fn node_count(&self, label: &str) -> u64 {
        self.nodes.get(label).copied().unwrap_or(0)
    }

    pub fn relationship_count(&self, edge_type: &str) -> u64 {
        self.relationships.get(edge_type).copied().unwrap_or(0)
    }
}

/// Outcome of one query in a batch
#[derive(Debug)]
pub struct BatchEntry {
    pub kind: QueryKind,
    pub elapsed: Duration,
    pub result: Result<QueryOutput>,
}

/// Results of `run_all`; one failed query does not affect the others
#[derive(Debug, Default)]
pub struct QueryBatchReport {
    pub entries: Vec<BatchEntry>,
}

impl QueryBatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(|e| e.result.is_ok())
    }

    pub fn get(&self, kind: QueryKind) -> Option<&BatchEntry> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    pub fn failures(&self) -> impl Iterator<Item = (QueryKind, &FraudGraphError)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().err().map(|err| (e.kind, err)))
    }
}

pub struct QueryEngine {
    store: Arc<dyn GraphStore>,
    defaults: QueryDefaults,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn GraphStore>, defaults: QueryDefaults) -> Self {
        Self { store, defaults }
    }

    pub fn defaults(&self) -> QueryDefaults {
        self.defaults
    }

    /// Query 1: per (customer, day) payment totals within `[start, end]`,
    /// ordered by customer id then date.
    pub async fn customer_payments(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        limit: i64,
    ) -> Result<Vec<CustomerPayment>> {
        let statement = Statement::CustomerPayments {
            window: DateWindow::new(start, end)?,
            limit: Limit::new(limit)?,
        };
        self.fetch(&statement).await
    }

    /// Query 2: terminals with at least one transaction in `[start, end]`
    /// strictly above 1.5× the terminal's average over the 30 days before
    /// `start`. Terminals without baseline activity are never flagged.
    pub async fn terminal_anomalies(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        limit: i64,
    ) -> Result<Vec<TerminalAnomaly>> {
        let statement = Statement::TerminalAnomalies {
            window: DateWindow::new(start, end)?,
            limit: Limit::new(limit)?,
        };
        self.fetch(&statement).await
    }

    /// Query 3: distinct ordered pairs of customers joined by an undirected
    /// path of exactly `4k + 4` relationships.
    pub async fn co_customers(&self, k: i64, limit: i64) -> Result<Vec<CoCustomerPair>> {
        let degree = Degree::new(k)?;
        let limit = Limit::new(limit)?;
        if degree.is_expensive() {
            warn!(
                k = degree.get(),
                path_length = degree.path_length(),
                "co-occurrence traversal at this degree can be very slow"
            );
        }
        self.fetch(&Statement::CustomerCoOccurrence { degree, limit }).await
    }

    /// Query 4: flagged counts per period (same rule as query 2) with the
    /// period's total transaction count, ordered by period.
    pub async fn period_fraud_rates(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PeriodFraudRate>> {
        let statement = Statement::PeriodFraudRates {
            window: DateWindow::new(start, end)?,
        };
        self.fetch(&statement).await
    }

    /// Run one query with options resolved against the defaults
    pub async fn run(&self, kind: QueryKind, options: &QueryOptions) -> Result<QueryOutput> {
        let defaults = &self.defaults;
        let output = match kind {
            QueryKind::CustomerPayments => {
                let window = options.window(defaults)?;
                let limit = options.limit(defaults)?;
                QueryOutput::CustomerPayments(
                    self.customer_payments(window.start(), window.end(), limit.get() as i64)
                        .await?,
                )
            }
            QueryKind::TerminalAnomalies => {
                let window = options.window(defaults)?;
                let limit = options.limit(defaults)?;
                QueryOutput::TerminalAnomalies(
                    self.terminal_anomalies(window.start(), window.end(), limit.get() as i64)
                        .await?,
                )
            }
            QueryKind::CoCustomers => {
                let degree = options.degree(defaults)?;
                let limit = options.limit(defaults)?;
                QueryOutput::CoCustomers(
                    self.co_customers(degree.get() as i64, limit.get() as i64)
                        .await?,
                )
            }
            QueryKind::PeriodFraudRates => {
                let window = options.window(defaults)?;
                QueryOutput::PeriodFraudRates(
                    self.period_fraud_rates(window.start(), window.end()).await?,
                )
            }
        };
        Ok(output)
    }

    /// Run all four queries in order. Each result is kept independently.
    pub async fn run_all(&self, options: &QueryOptions) -> QueryBatchReport {
        let mut report = QueryBatchReport::default();
        for kind in QueryKind::ALL {
            let started = Instant::now();
            let result = self.run(kind, options).await;
            let elapsed = started.elapsed();
            match &result {
                Ok(output) => info!(query = %kind, rows = output.len(), elapsed_ms = elapsed.as_millis() as u64, "query finished"),
                Err(err) => warn!(query = %kind, error = %err, "query failed"),
            }
            report.entries.push(BatchEntry {
                kind,
                elapsed,
                result,
            });
        }
        report
    }

    /// Node counts per label and relationship counts per type
    pub async fn graph_counts(&self) -> Result<GraphCounts> {
        let nodes = run_read(self.store.as_ref(), &Statement::CountNodesByLabel).await?;
        let relationships =
            run_read(self.store.as_ref(), &Statement::CountRelationshipsByType).await?;

        let collect = |result: &crate::store::QueryResult| -> Result<BTreeMap<String, u64>> {
            result
                .rows()
                .map(|row| {
                    let name = row.get("name").and_then(|v| v.as_str());
                    let count = row.get("count").and_then(|v| v.as_u64());
                    match (name, count) {
                        (Some(name), Some(count)) => Ok((name.to_string(), count)),
                        _ => Err(FraudGraphError::Decode(format!(
                            "unexpected count row {:?}",
                            row.values()
                        ))),
                    }
                })
                .collect()
        };
        Ok(GraphCounts {
            nodes: collect(&nodes)?,
            relationships: collect(&relationships)?,
        })
    }

    async fn fetch<T: FromRow>(&self, statement: &Statement) -> Result<Vec<T>> {
        let result = run_read(self.store.as_ref(), statement).await?;
        debug!(statement = statement.name(), rows = result.len(), "query returned");
        decode_all(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryGraphStore;

    fn engine() -> QueryEngine {
        QueryEngine::new(Arc::new(MemoryGraphStore::default()), QueryDefaults::default())
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("2".parse::<QueryKind>(), Ok(QueryKind::TerminalAnomalies));
        assert_eq!("co-customers".parse::<QueryKind>(), Ok(QueryKind::CoCustomers));
        assert!("5".parse::<QueryKind>().is_err());
        assert_eq!(QueryKind::PeriodFraudRates.to_string(), "period-fraud-rates");
    }

    #[tokio::test]
    async fn test_invalid_parameters_rejected() {
        let engine = engine();
        let d = |day| NaiveDate::from_ymd_opt(2018, 6, day).unwrap();

        let err = engine.customer_payments(d(1), d(30), 0).await.unwrap_err();
        assert!(matches!(err, FraudGraphError::QueryParameter(_)));
        let err = engine.terminal_anomalies(d(30), d(1), 10).await.unwrap_err();
        assert!(matches!(err, FraudGraphError::QueryParameter(_)));
        let err = engine.co_customers(-1, 10).await.unwrap_err();
        assert!(matches!(err, FraudGraphError::QueryParameter(_)));
        let err = engine.co_customers(9, 10).await.unwrap_err();
        assert!(matches!(err, FraudGraphError::QueryParameter(_)));
    }

    #[tokio::test]
    async fn test_empty_graph() {
        let engine = engine();
        let report = engine.run_all(&QueryOptions::default()).await;
        assert!(report.all_succeeded());
        assert_eq!(report.entries.len(), 4);
        assert!(report.entries.iter().all(|e| e.result.as_ref().unwrap().is_empty()));

        let counts = engine.graph_counts().await.unwrap();
        assert_eq!(counts, GraphCounts::default());
    }

    #[tokio::test]
    async fn test_batch_keeps_failures_per_query() {
        let options = QueryOptions {
            degree: Some(12),
            ..QueryOptions::default()
        };
        let report = engine().run_all(&options).await;
        assert!(!report.all_succeeded());
        let failed: Vec<QueryKind> = report.failures().map(|(kind, _)| kind).collect();
        assert_eq!(failed, vec![QueryKind::CoCustomers]);
        assert!(report.get(QueryKind::CustomerPayments).unwrap().result.is_ok());
    }
}

//! Graph store seam
//!
//! The loader and query engine talk to the graph database only through
//! [`GraphStore`] and [`Transaction`]. Two implementations ship with the crate:
//!
//! - **`HttpGraphStore`**: a Cypher server reached over the Neo4j HTTP
//!   transactional endpoint. The production path.
//! - **`MemoryGraphStore`**: an in-process property graph that evaluates the
//!   same statements directly. Used by tests, benches and embedded runs.
//!
//! Handles are explicit values. A transaction is opened per unit of work and
//! is always finished by `commit` or `rollback`; dropping an unfinished
//! embedded transaction rolls it back.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cypher::Statement;
use crate::graph::GraphError;

pub use http::HttpGraphStore;
pub use memory::MemoryGraphStore;

/// Errors raised by a store implementation
#[derive(Error, Debug)]
pub enum StoreError {
    /// Cannot establish or keep a session with the store
    #[error("Connection error: {0}")]
    Connectivity(String),

    /// The store reports the failure as safe to retry after rollback
    #[error("Transient error: {0}")]
    Transient(String),

    /// The statement was rejected or failed while executing
    #[error("Statement failed [{code}]: {message}")]
    Statement { code: String, message: String },

    #[error("Write statement `{0}` issued in a read transaction")]
    ReadOnly(&'static str),

    #[error("Transaction already finished")]
    TransactionClosed,

    #[error("Store handle closed")]
    Closed,

    /// Response did not follow the expected protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether resubmitting the same unit of work may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Transaction access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    Write,
}

/// Tabular result of one statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub records: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: Vec<serde_json::Value>) {
        self.records.push(record);
    }

    /// Number of result records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the result is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.records.iter().map(move |values| Row {
            result: self,
            values,
        })
    }

    /// Integer from the first record, e.g. `RETURN count(*) AS created`
    pub fn scalar_i64(&self, column: &str) -> Option<i64> {
        self.rows().next().and_then(|row| row.get(column)).and_then(|v| v.as_i64())
    }
}

/// A record viewed through its result's column names
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    result: &'a QueryResult,
    values: &'a [serde_json::Value],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a serde_json::Value> {
        self.result.column_index(column).and_then(|i| self.values.get(i))
    }

    pub fn values(&self) -> &'a [serde_json::Value] {
        self.values
    }
}

/// A transactional property-graph store bound to one database.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Database the handle is bound to
    fn database(&self) -> &str;

    /// Open a transaction
    async fn begin(&self, mode: AccessMode) -> StoreResult<Box<dyn Transaction>>;

    /// Check the store is reachable
    async fn verify_connectivity(&self) -> StoreResult<()>;

    /// Release the handle; later `begin` calls fail with `Closed`
    async fn close(&self) -> StoreResult<()>;
}

/// An open transaction. Finish it with `commit` or `rollback`.
#[async_trait]
pub trait Transaction: Send {
    fn mode(&self) -> AccessMode;

    /// Execute one statement inside the transaction
    async fn run(&mut self, statement: &Statement) -> StoreResult<QueryResult>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Run statements in one write transaction: all commit or none do.
pub async fn run_write(
    store: &dyn GraphStore,
    statements: &[Statement],
) -> StoreResult<Vec<QueryResult>> {
    let mut tx = store.begin(AccessMode::Write).await?;
    let mut results = Vec::with_capacity(statements.len());
    for statement in statements {
        debug!(statement = statement.name(), "running write statement");
        match tx.run(statement).await {
            Ok(result) => results.push(result),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed statement also failed");
                }
                return Err(err);
            }
        }
    }
    tx.commit().await?;
    Ok(results)
}

/// Run one statement in its own read transaction.
pub async fn run_read(store: &dyn GraphStore, statement: &Statement) -> StoreResult<QueryResult> {
    let mut tx = store.begin(AccessMode::Read).await?;
    debug!(statement = statement.name(), "running read statement");
    match tx.run(statement).await {
        Ok(result) => {
            tx.commit().await?;
            Ok(result)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "closing failed read transaction");
            }
            Err(err)
        }
    }
}

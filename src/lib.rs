//! fraudgraph
//!
//! Loads customers, terminals and payment transactions into a property-graph
//! store and runs a fixed family of fraud-analysis queries over it.
//!
//! # Graph
//!
//! ```text
//! (:Customer {id})-[:HAS_TX]->(:Transaction {id, amount, datetime, date, period, is_fraud})-[:PAYED_TO]->(:Terminal {id})
//! ```
//!
//! # Components
//!
//! - [`store`]: the transactional store seam, with an HTTP client for a
//!   Cypher server and an embedded in-memory store
//! - [`chunk`]: half-open chunk planning for transaction ingestion
//! - [`loader`]: entities, indexes, chunked transactions, clear
//! - [`query`]: the four analytical queries and a batch runner
//! - [`tables`]: CSV input tables
//! - [`config`]: YAML configuration with environment overrides
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use fraudgraph::{Config, InputTables, Loader, MemoryGraphStore, QueryEngine, QueryKind, QueryOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> fraudgraph::Result<()> {
//! let config = Config::default();
//! let store = Arc::new(MemoryGraphStore::default());
//!
//! let tables = InputTables::read_dir("data")?;
//! let report = Loader::new(store.clone(), config.loader).load(&tables).await?;
//! println!("{} transactions, {} unmatched", report.transactions_created, report.unmatched_rows());
//!
//! let engine = QueryEngine::new(store, config.queries);
//! let output = engine.run(QueryKind::CustomerPayments, &QueryOptions::default()).await?;
//! println!("{} rows", output.len());
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod config;
pub mod cypher;
pub mod error;
pub mod graph;
pub mod indexes;
pub mod loader;
pub mod model;
pub mod query;
pub mod store;
pub mod tables;

// Re-export main types for convenience
pub use chunk::{ChunkPlanner, ChunkRange};
pub use config::{Config, DuplicatePolicy, LoaderConfig, QueryDefaults, RetryPolicy, StoreConfig};
pub use error::{ChunkFailure, FraudGraphError, Result};
pub use indexes::IndexManager;
pub use loader::{ClearReport, LoadReport, Loader};
pub use model::{EdgeType, EntityKind, Label, PeriodGranularity, TransactionRow};
pub use query::{
    CoCustomerPair, CustomerPayment, GraphCounts, PeriodFraudRate, QueryBatchReport, QueryEngine,
    QueryKind, QueryOptions, QueryOutput, TerminalAnomaly,
};
pub use store::{AccessMode, GraphStore, HttpGraphStore, MemoryGraphStore, StoreError};
pub use tables::InputTables;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

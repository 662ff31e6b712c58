//! Graph loader
//!
//! Loads the three input tables in a fixed order:
//!
//! 1. Customer and Terminal nodes, one write transaction per table
//! 2. id indexes on both labels, awaited until online
//! 3. Transaction nodes with their HAS_TX / PAYED_TO edges, one write
//!    transaction per planned chunk
//!
//! A failed chunk is rolled back as a unit and reported with its row range.
//! Chunks committed before it stay committed, so a load can be resumed from
//! the failed chunk index with [`Loader::create_transactions_from`].

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::chunk::{ChunkPlanner, ChunkRange};
use crate::config::{DuplicatePolicy, LoaderConfig};
use crate::cypher::Statement;
use crate::error::{ChunkFailure, FraudGraphError, Result};
use crate::indexes::IndexManager;
use crate::model::{EntityKind, TransactionRow};
use crate::store::{run_write, GraphStore, QueryResult, StoreResult};
use crate::tables::InputTables;

/// Counts from a load. Unmatched rows are rows whose customer or terminal id
/// did not resolve; they produce no node and no edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub customers_created: u64,
    pub terminals_created: u64,
    pub chunks_committed: usize,
    pub rows_attempted: u64,
    pub rows_matched: u64,
    /// Can exceed `rows_matched` when entity ids are duplicated
    pub transactions_created: u64,
    pub unmatched_ids: Vec<i64>,
}

impl LoadReport {
    pub fn unmatched_rows(&self) -> u64 {
        self.rows_attempted - self.rows_matched
    }

    fn absorb(&mut self, outcome: ChunkOutcome) {
        self.chunks_committed += 1;
        self.rows_attempted += outcome.range.len() as u64;
        self.rows_matched += outcome.matched;
        self.transactions_created += outcome.created;
        self.unmatched_ids.extend(outcome.unmatched_ids);
    }

    fn merge(&mut self, other: LoadReport) {
        self.customers_created += other.customers_created;
        self.terminals_created += other.terminals_created;
        self.chunks_committed += other.chunks_committed;
        self.rows_attempted += other.rows_attempted;
        self.rows_matched += other.rows_matched;
        self.transactions_created += other.transactions_created;
        self.unmatched_ids.extend(other.unmatched_ids);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub relationships_deleted: u64,
    pub nodes_deleted: u64,
}

#[derive(Debug)]
struct ChunkOutcome {
    range: ChunkRange,
    matched: u64,
    created: u64,
    unmatched_ids: Vec<i64>,
}

pub struct Loader {
    store: Arc<dyn GraphStore>,
    config: LoaderConfig,
    indexes: IndexManager,
}

impl Loader {
    pub fn new(store: Arc<dyn GraphStore>, config: LoaderConfig) -> Self {
        Self {
            indexes: IndexManager::new(store.clone()),
            store,
            config,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Full load: entities, indexes, then chunked transactions.
    ///
    /// Every row is validated, and under `DuplicatePolicy::Reject` every
    /// entity table is checked, before the first write.
    pub async fn load(&self, tables: &InputTables) -> Result<LoadReport> {
        let started = Instant::now();
        let chunk_size = self.config.chunk_size()?;
        self.check_duplicates(EntityKind::Customer, &tables.customers)?;
        self.check_duplicates(EntityKind::Terminal, &tables.terminals)?;
        validate_rows(&tables.transactions)?;

        let mut report = LoadReport {
            customers_created: self.create_entities(EntityKind::Customer, &tables.customers).await?,
            terminals_created: self.create_entities(EntityKind::Terminal, &tables.terminals).await?,
            ..LoadReport::default()
        };
        self.ensure_indexes().await?;
        match self.create_transactions_chunked(&tables.transactions, chunk_size).await {
            Ok(transactions) => report.merge(transactions),
            Err(mut err) => {
                if let Some(committed) = err.committed_mut() {
                    report.merge(std::mem::take(committed));
                    *committed = report;
                }
                return Err(err);
            }
        }

        info!(
            customers = report.customers_created,
            terminals = report.terminals_created,
            transactions = report.transactions_created,
            unmatched = report.unmatched_rows(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "load complete"
        );
        Ok(report)
    }

    /// Create one node per id in a single write transaction.
    /// Returns the number of nodes created.
    pub async fn create_entities(&self, kind: EntityKind, ids: &[i64]) -> Result<u64> {
        self.check_duplicates(kind, ids)?;
        let results = run_write(
            self.store.as_ref(),
            &[Statement::CreateEntities {
                kind,
                ids: ids.to_vec(),
            }],
        )
        .await?;
        let created = results
            .first()
            .and_then(|r| r.scalar_i64("created"))
            .unwrap_or(0) as u64;
        info!(%kind, created, "entities created");
        Ok(created)
    }

    pub async fn ensure_indexes(&self) -> Result<()> {
        self.indexes.ensure_indexes().await
    }

    /// Ingest all rows, one write transaction per chunk.
    pub async fn create_transactions_chunked(
        &self,
        rows: &[TransactionRow],
        chunk_size: NonZeroUsize,
    ) -> Result<LoadReport> {
        self.create_transactions_from(rows, chunk_size, 0).await
    }

    /// Ingest starting at chunk `first_chunk` of the plan over `rows`.
    /// Resuming with the index reported by `ChunkWrite` and the same chunk
    /// size continues exactly where the failed load stopped.
    pub async fn create_transactions_from(
        &self,
        rows: &[TransactionRow],
        chunk_size: NonZeroUsize,
        first_chunk: usize,
    ) -> Result<LoadReport> {
        validate_rows(rows)?;
        let planner = ChunkPlanner::new(rows.len(), chunk_size);
        info!(
            rows = rows.len(),
            chunks = planner.len(),
            first_chunk,
            "ingesting transactions"
        );
        self.submit(rows, planner.starting_at(first_chunk).collect())
            .await
    }

    /// Resubmit specific chunks of the plan, e.g. those listed by `ChunksFailed`
    pub async fn rerun_chunks(
        &self,
        rows: &[TransactionRow],
        chunk_size: NonZeroUsize,
        indices: &[usize],
    ) -> Result<LoadReport> {
        validate_rows(rows)?;
        let planner = ChunkPlanner::new(rows.len(), chunk_size);
        let ranges: Vec<ChunkRange> = indices.iter().filter_map(|i| planner.chunk(*i)).collect();
        self.submit(rows, ranges).await
    }

    /// Delete all relationships, then all nodes, in one write transaction.
    pub async fn clear(&self) -> Result<ClearReport> {
        let results = run_write(
            self.store.as_ref(),
            &[Statement::DeleteAllRelationships, Statement::DeleteAllNodes],
        )
        .await?;
        let deleted = |i: usize| -> u64 {
            results
                .get(i)
                .and_then(|r| r.scalar_i64("deleted"))
                .unwrap_or(0) as u64
        };
        let report = ClearReport {
            relationships_deleted: deleted(0),
            nodes_deleted: deleted(1),
        };
        info!(
            relationships = report.relationships_deleted,
            nodes = report.nodes_deleted,
            "graph cleared"
        );
        Ok(report)
    }

    fn check_duplicates(&self, kind: EntityKind, ids: &[i64]) -> Result<()> {
        if self.config.duplicate_policy == DuplicatePolicy::Reject {
            if let Some(id) = first_duplicate(ids) {
                return Err(FraudGraphError::DuplicateEntityId { kind, id });
            }
        }
        Ok(())
    }

    async fn submit(&self, rows: &[TransactionRow], ranges: Vec<ChunkRange>) -> Result<LoadReport> {
        if self.config.write_concurrency <= 1 {
            self.submit_sequential(rows, ranges).await
        } else {
            self.submit_concurrent(rows, ranges).await
        }
    }

    /// Stops at the first failed chunk; the error carries what committed.
    async fn submit_sequential(
        &self,
        rows: &[TransactionRow],
        ranges: Vec<ChunkRange>,
    ) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        for range in ranges {
            match self.write_chunk(range, rows).await {
                Ok(outcome) => report.absorb(outcome),
                Err(source) => {
                    return Err(FraudGraphError::ChunkWrite {
                        index: range.index,
                        start: range.start,
                        end: range.end,
                        source,
                        committed: Box::new(report),
                    })
                }
            }
        }
        Ok(report)
    }

    /// Keeps up to `write_concurrency` chunks in flight and runs every chunk
    /// even when some fail; failures are returned together.
    async fn submit_concurrent(
        &self,
        rows: &[TransactionRow],
        ranges: Vec<ChunkRange>,
    ) -> Result<LoadReport> {
        let results: Vec<(ChunkRange, StoreResult<ChunkOutcome>)> = stream::iter(ranges)
            .map(|range| async move { (range, self.write_chunk(range, rows).await) })
            .buffered(self.config.write_concurrency)
            .collect()
            .await;

        let mut report = LoadReport::default();
        let mut failures = Vec::new();
        for (range, result) in results {
            match result {
                Ok(outcome) => report.absorb(outcome),
                Err(source) => failures.push(ChunkFailure {
                    index: range.index,
                    start: range.start,
                    end: range.end,
                    source,
                }),
            }
        }
        if failures.is_empty() {
            return Ok(report);
        }
        failures.sort_by_key(|f| f.index);
        warn!(
            failed = failures.len(),
            committed = report.chunks_committed,
            "concurrent ingestion finished with failed chunks"
        );
        Err(FraudGraphError::ChunksFailed {
            failures,
            committed: Box::new(report),
        })
    }

    /// One chunk in one write transaction, retrying transient failures.
    /// `run_write` has rolled the transaction back before a retry starts.
    async fn write_chunk(&self, range: ChunkRange, rows: &[TransactionRow]) -> StoreResult<ChunkOutcome> {
        let slice = &rows[range.range()];
        let statement = Statement::CreateTransactions {
            rows: slice.iter().map(|r| r.to_node(self.config.period)).collect(),
        };
        let retry = self.config.retry;

        let mut attempt = 1;
        let result = loop {
            match run_write(self.store.as_ref(), std::slice::from_ref(&statement)).await {
                Ok(mut results) => break results.pop().unwrap_or_default(),
                Err(err) if err.is_transient() && attempt < retry.max_attempts => {
                    warn!(chunk = range.index, attempt, error = %err, "chunk rolled back, retrying");
                    tokio::time::sleep(retry.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(chunk = range.index, start = range.start, end = range.end, error = %err, "chunk rolled back");
                    return Err(err);
                }
            }
        };

        let outcome = chunk_outcome(range, slice, &result);
        if !outcome.unmatched_ids.is_empty() {
            warn!(
                chunk = range.index,
                unmatched = outcome.unmatched_ids.len(),
                "rows reference a missing customer or terminal"
            );
        }
        debug!(
            chunk = range.index,
            start = range.start,
            end = range.end,
            created = outcome.created,
            "chunk committed"
        );
        Ok(outcome)
    }
}

fn chunk_outcome(range: ChunkRange, slice: &[TransactionRow], result: &QueryResult) -> ChunkOutcome {
    let created_ids: HashSet<i64> = result
        .rows()
        .filter_map(|row| row.get("id").and_then(|v| v.as_i64()))
        .collect();

    let mut matched = 0;
    let mut unmatched_ids = Vec::new();
    for row in slice {
        if created_ids.contains(&row.id) {
            matched += 1;
        } else {
            unmatched_ids.push(row.id);
        }
    }
    ChunkOutcome {
        range,
        matched,
        created: result.len() as u64,
        unmatched_ids,
    }
}

fn validate_rows(rows: &[TransactionRow]) -> Result<()> {
    rows.iter().try_for_each(TransactionRow::validate)
}

fn first_duplicate(ids: &[i64]) -> Option<i64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().find(|id| !seen.insert(*id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_duplicate() {
        assert_eq!(first_duplicate(&[1, 2, 3]), None);
        assert_eq!(first_duplicate(&[1, 2, 1, 2]), Some(1));
        assert_eq!(first_duplicate(&[]), None);
    }

    #[test]
    fn test_chunk_outcome_separates_misses() {
        let at = chrono::NaiveDateTime::parse_from_str("2018-06-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let rows: Vec<TransactionRow> = (10..13)
            .map(|id| TransactionRow {
                id,
                customer_id: 1,
                terminal_id: 1,
                amount: 1.0,
                datetime: at,
                is_fraud: false,
            })
            .collect();
        let mut result = QueryResult::new(&["id"]);
        result.push(vec![json!(10)]);
        result.push(vec![json!(12)]);
        result.push(vec![json!(12)]);

        let range = ChunkRange {
            index: 0,
            start: 0,
            end: 3,
        };
        let outcome = chunk_outcome(range, &rows, &result);
        assert_eq!(outcome.matched, 2);
        assert_eq!(outcome.created, 3);
        assert_eq!(outcome.unmatched_ids, vec![11]);
    }
}

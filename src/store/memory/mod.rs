//! Embedded store over an in-process [`PropertyGraph`]
//!
//! Write transactions hold the graph's write lock for their whole lifetime
//! and journal every mutation; rollback (explicit, or by dropping the
//! transaction) replays the journal backwards. Read transactions share the
//! read lock, so they observe only committed state.

mod eval;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, warn};

use super::{AccessMode, GraphStore, QueryResult, StoreError, StoreResult, Transaction};
use crate::cypher::Statement;
use crate::graph::{Edge, EdgeId, Node, NodeId, PropertyGraph};
use crate::model::Label;

/// A mutation recorded so it can be undone
#[derive(Debug)]
pub(crate) enum Undo {
    NodeCreated(NodeId),
    EdgeCreated(EdgeId),
    IndexCreated(Label, &'static str),
    EdgesDeleted(Vec<Edge>),
    NodesDeleted(Vec<Node>),
}

/// Injected write failures, for exercising rollback and retry paths.
#[derive(Debug, Default)]
pub struct FaultPlan {
    /// (transaction id, remaining failures)
    transaction: Mutex<Option<(i64, usize)>>,
}

impl FaultPlan {
    /// Fail the next `times` chunk statements containing `transaction_id`,
    /// after the rows preceding it in the chunk have been applied.
    pub fn fail_on_transaction(&self, transaction_id: i64, times: usize) {
        if let Ok(mut slot) = self.transaction.lock() {
            *slot = Some((transaction_id, times));
        }
    }

    pub(crate) fn should_fail(&self, transaction_id: i64) -> bool {
        let Ok(mut slot) = self.transaction.lock() else {
            return false;
        };
        match slot.as_mut() {
            Some((id, remaining)) if *id == transaction_id && *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// In-process graph store
#[derive(Debug, Clone)]
pub struct MemoryGraphStore {
    database: String,
    graph: Arc<RwLock<PropertyGraph>>,
    faults: Arc<FaultPlan>,
    closed: Arc<AtomicBool>,
}

impl MemoryGraphStore {
    /// Create a store with a fresh empty graph
    pub fn new(database: impl Into<String>) -> Self {
        Self::with_graph(database, Arc::new(RwLock::new(PropertyGraph::new())))
    }

    /// Wrap an existing graph
    pub fn with_graph(database: impl Into<String>, graph: Arc<RwLock<PropertyGraph>>) -> Self {
        Self {
            database: database.into(),
            graph,
            faults: Arc::new(FaultPlan::default()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Direct access to the underlying graph, for inspection
    pub fn graph(&self) -> &Arc<RwLock<PropertyGraph>> {
        &self.graph
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new("neo4j")
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    fn database(&self) -> &str {
        &self.database
    }

    async fn begin(&self, mode: AccessMode) -> StoreResult<Box<dyn Transaction>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let guard = match mode {
            AccessMode::Read => GraphGuard::Read(self.graph.clone().read_owned().await),
            AccessMode::Write => GraphGuard::Write(self.graph.clone().write_owned().await),
        };
        Ok(Box::new(MemoryTransaction {
            guard: Some(guard),
            journal: Vec::new(),
            faults: self.faults.clone(),
        }))
    }

    async fn verify_connectivity(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

enum GraphGuard {
    Read(OwnedRwLockReadGuard<PropertyGraph>),
    Write(OwnedRwLockWriteGuard<PropertyGraph>),
}

/// Transaction over the embedded graph. `guard` is `None` once finished.
pub struct MemoryTransaction {
    guard: Option<GraphGuard>,
    journal: Vec<Undo>,
    faults: Arc<FaultPlan>,
}

impl MemoryTransaction {
    fn undo_all(&mut self) {
        let Some(GraphGuard::Write(graph)) = self.guard.as_mut() else {
            return;
        };
        let undone = self.journal.len();
        while let Some(entry) = self.journal.pop() {
            let outcome = match entry {
                Undo::NodeCreated(id) => graph.remove_node(id).map(drop),
                Undo::EdgeCreated(id) => graph.remove_edge(id).map(drop),
                Undo::IndexCreated(label, property) => {
                    graph.drop_index(label, property);
                    Ok(())
                }
                Undo::EdgesDeleted(edges) => edges
                    .into_iter()
                    .try_for_each(|edge| graph.restore_edge(edge)),
                Undo::NodesDeleted(nodes) => {
                    nodes.into_iter().for_each(|node| graph.restore_node(node));
                    Ok(())
                }
            };
            if let Err(err) = outcome {
                warn!(error = %err, "undo step failed during rollback");
            }
        }
        debug!(undone, "rolled back embedded transaction");
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn mode(&self) -> AccessMode {
        match self.guard {
            Some(GraphGuard::Read(_)) | None => AccessMode::Read,
            Some(GraphGuard::Write(_)) => AccessMode::Write,
        }
    }

    async fn run(&mut self, statement: &Statement) -> StoreResult<QueryResult> {
        match self.guard.as_mut() {
            None => Err(StoreError::TransactionClosed),
            Some(GraphGuard::Read(graph)) => {
                if statement.access_mode() == AccessMode::Write {
                    return Err(StoreError::ReadOnly(statement.name()));
                }
                eval::read(graph, statement)
            }
            Some(GraphGuard::Write(graph)) => {
                if statement.access_mode() == AccessMode::Read {
                    return eval::read(graph, statement);
                }
                eval::write(graph, statement, &mut self.journal, &self.faults)
            }
        }
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        if self.guard.is_none() {
            return Err(StoreError::TransactionClosed);
        }
        self.journal.clear();
        self.guard = None;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        if self.guard.is_none() {
            return Err(StoreError::TransactionClosed);
        }
        self.undo_all();
        self.guard = None;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.journal.is_empty() {
            self.undo_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKind;
    use crate::store::{run_read, run_write};

    fn create(kind: EntityKind, ids: &[i64]) -> Statement {
        Statement::CreateEntities {
            kind,
            ids: ids.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_commit_persists() {
        let store = MemoryGraphStore::default();
        run_write(&store, &[create(EntityKind::Customer, &[1, 2, 3])])
            .await
            .unwrap();
        assert_eq!(store.graph().read().await.node_count(), 3);
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let store = MemoryGraphStore::default();
        let mut tx = store.begin(AccessMode::Write).await.unwrap();
        tx.run(&create(EntityKind::Terminal, &[1, 2])).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.graph().read().await.node_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_without_commit_rolls_back() {
        let store = MemoryGraphStore::default();
        {
            let mut tx = store.begin(AccessMode::Write).await.unwrap();
            tx.run(&create(EntityKind::Customer, &[1])).await.unwrap();
        }
        assert_eq!(store.graph().read().await.node_count(), 0);
    }

    #[tokio::test]
    async fn test_read_transaction_rejects_writes() {
        let store = MemoryGraphStore::default();
        let mut tx = store.begin(AccessMode::Read).await.unwrap();
        let err = tx.run(&create(EntityKind::Customer, &[1])).await.unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly("create_entities")));
        assert_eq!(tx.mode(), AccessMode::Read);
    }

    #[tokio::test]
    async fn test_clear_rollback_restores_graph() {
        let store = MemoryGraphStore::default();
        run_write(&store, &[create(EntityKind::Customer, &[1, 2])])
            .await
            .unwrap();

        let mut tx = store.begin(AccessMode::Write).await.unwrap();
        tx.run(&Statement::DeleteAllRelationships).await.unwrap();
        tx.run(&Statement::DeleteAllNodes).await.unwrap();
        tx.rollback().await.unwrap();

        let counts = run_read(&store, &Statement::CountNodesByLabel).await.unwrap();
        assert_eq!(counts.scalar_i64("count"), Some(2));
    }

    #[tokio::test]
    async fn test_closed_store_refuses_transactions() {
        let store = MemoryGraphStore::default();
        store.close().await.unwrap();
        assert!(matches!(
            store.begin(AccessMode::Read).await.err(),
            Some(StoreError::Closed)
        ));
        assert!(store.verify_connectivity().await.is_err());
    }

    #[test]
    fn test_fault_plan_counts_down() {
        let plan = FaultPlan::default();
        plan.fail_on_transaction(7, 2);
        assert!(!plan.should_fail(6));
        assert!(plan.should_fail(7));
        assert!(plan.should_fail(7));
        assert!(!plan.should_fail(7));
    }
}

mod common;

use common::{loader_config, memory_store, small_tables, tx};
use fraudgraph::{
    DuplicatePolicy, EntityKind, FraudGraphError, Label, Loader, LoaderConfig, QueryDefaults,
    QueryEngine, RetryPolicy,
};
use std::collections::BTreeSet;
use std::num::NonZeroUsize;

fn size(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

#[tokio::test]
async fn test_load_creates_nodes_and_edges() {
    let (store, handle) = memory_store();
    let loader = Loader::new(handle.clone(), loader_config(4));

    let report = loader.load(&small_tables()).await.unwrap();
    assert_eq!(report.customers_created, 3);
    assert_eq!(report.terminals_created, 2);
    assert_eq!(report.chunks_committed, 3);
    assert_eq!(report.rows_attempted, 10);
    assert_eq!(report.rows_matched, 10);
    assert_eq!(report.transactions_created, 10);
    assert_eq!(report.unmatched_rows(), 0);

    let counts = QueryEngine::new(handle, QueryDefaults::default())
        .graph_counts()
        .await
        .unwrap();
    assert_eq!(counts.node_count("Customer"), 3);
    assert_eq!(counts.node_count("Terminal"), 2);
    assert_eq!(counts.node_count("Transaction"), 10);
    assert_eq!(counts.relationship_count("HAS_TX"), 10);
    assert_eq!(counts.relationship_count("PAYED_TO"), 10);

    let graph = store.graph().read().await;
    assert_eq!(graph.node_count(), 15);
    assert_eq!(graph.edge_count(), 20);
}

#[tokio::test]
async fn test_unmatched_rows_are_counted_not_created() {
    let (store, handle) = memory_store();
    let mut tables = small_tables();
    tables.transactions.push(tx(10, 99, 0, 5.0, "2018-06-02 12:00:00"));
    tables.transactions.push(tx(11, 0, 42, 5.0, "2018-06-02 12:00:00"));

    let report = Loader::new(handle, loader_config(5)).load(&tables).await.unwrap();
    assert_eq!(report.rows_attempted, 12);
    assert_eq!(report.rows_matched, 10);
    assert_eq!(report.unmatched_rows(), 2);
    assert_eq!(report.unmatched_ids, vec![10, 11]);

    let graph = store.graph().read().await;
    assert_eq!(graph.count_by_label(Label::Transaction), 10);
    assert_eq!(graph.edge_count(), 20);
}

#[tokio::test]
async fn test_duplicate_ids_allowed_by_default() {
    let (store, handle) = memory_store();
    let loader = Loader::new(handle, loader_config(10));

    assert_eq!(loader.create_entities(EntityKind::Customer, &[1, 1, 2]).await.unwrap(), 3);
    assert_eq!(loader.create_entities(EntityKind::Terminal, &[7]).await.unwrap(), 1);
    loader.ensure_indexes().await.unwrap();

    let rows = vec![tx(100, 1, 7, 3.0, "2018-06-01 09:00:00")];
    let report = loader.create_transactions_chunked(&rows, size(10)).await.unwrap();
    // one row, matched against both customer nodes with id 1
    assert_eq!(report.rows_matched, 1);
    assert_eq!(report.transactions_created, 2);
    assert_eq!(store.graph().read().await.count_by_label(Label::Transaction), 2);
}

#[tokio::test]
async fn test_duplicate_ids_rejected_before_any_write() {
    let (store, handle) = memory_store();
    let config = LoaderConfig {
        duplicate_policy: DuplicatePolicy::Reject,
        ..loader_config(4)
    };
    let mut tables = small_tables();
    tables.terminals.push(1);

    let err = Loader::new(handle, config).load(&tables).await.unwrap_err();
    assert!(matches!(
        err,
        FraudGraphError::DuplicateEntityId {
            kind: EntityKind::Terminal,
            id: 1
        }
    ));
    assert_eq!(store.graph().read().await.node_count(), 0);
}

#[tokio::test]
async fn test_invalid_amount_rejected_before_any_write() {
    let (store, handle) = memory_store();
    let mut tables = small_tables();
    tables.transactions[7].amount = -3.0;

    let err = Loader::new(handle, loader_config(4)).load(&tables).await.unwrap_err();
    assert!(matches!(err, FraudGraphError::InvalidRecord(_)));
    assert_eq!(store.graph().read().await.node_count(), 0);
}

#[tokio::test]
async fn test_failed_chunk_rolls_back_and_load_resumes() {
    let (store, handle) = memory_store();
    let tables = small_tables();
    let loader = Loader::new(handle, loader_config(4));

    // row 5 sits in chunk 1 (rows 4..8); row 4 is written before the failure
    store.faults().fail_on_transaction(5, 1);
    let err = loader.load(&tables).await.unwrap_err();
    match &err {
        FraudGraphError::ChunkWrite {
            index, start, end, source, ..
        } => {
            assert_eq!((*index, *start, *end), (1, 4, 8));
            assert!(source.is_transient());
        }
        other => panic!("expected ChunkWrite, got {other:?}"),
    }
    {
        let graph = store.graph().read().await;
        // entities and chunk 0 committed; chunk 1 fully rolled back
        assert_eq!(graph.count_by_label(Label::Customer), 3);
        assert_eq!(graph.count_by_label(Label::Transaction), 4);
        assert_eq!(graph.edge_count(), 8);
    }

    let resumed = loader
        .create_transactions_from(&tables.transactions, size(4), 1)
        .await
        .unwrap();
    assert_eq!(resumed.chunks_committed, 2);
    assert_eq!(resumed.transactions_created, 6);

    let graph = store.graph().read().await;
    let ids: BTreeSet<i64> = graph
        .nodes_by_label(Label::Transaction)
        .filter_map(|n| n.domain_id())
        .collect();
    assert_eq!(graph.count_by_label(Label::Transaction), 10);
    assert_eq!(ids, (0..10).collect());
}

#[tokio::test]
async fn test_chunk_failure_keeps_earlier_unmatched_rows() {
    let (store, handle) = memory_store();
    let mut tables = small_tables();
    tables.transactions[1] = tx(1, 99, 1, 11.0, "2018-06-01 01:15:00");
    let loader = Loader::new(handle, loader_config(4));

    store.faults().fail_on_transaction(5, 1);
    let err = loader.load(&tables).await.unwrap_err();
    assert_eq!(err.chunk_failures(), vec![(1, 4, 8)]);

    let committed = err.committed().unwrap();
    assert_eq!(committed.customers_created, 3);
    assert_eq!(committed.terminals_created, 2);
    assert_eq!(committed.chunks_committed, 1);
    assert_eq!(committed.rows_attempted, 4);
    assert_eq!(committed.rows_matched, 3);
    assert_eq!(committed.unmatched_ids, vec![1]);

    let resumed = loader
        .create_transactions_from(&tables.transactions, size(4), 1)
        .await
        .unwrap();
    assert_eq!(resumed.unmatched_rows(), 0);
    assert_eq!(committed.unmatched_rows() + resumed.unmatched_rows(), 1);
    assert_eq!(store.graph().read().await.count_by_label(Label::Transaction), 9);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let (store, handle) = memory_store();
    let config = LoaderConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_ms: 1,
        },
        ..loader_config(4)
    };

    store.faults().fail_on_transaction(9, 2);
    let report = Loader::new(handle, config).load(&small_tables()).await.unwrap();
    assert_eq!(report.chunks_committed, 3);
    assert_eq!(report.transactions_created, 10);
    assert_eq!(store.graph().read().await.count_by_label(Label::Transaction), 10);
}

#[tokio::test]
async fn test_retry_gives_up_after_max_attempts() {
    let (store, handle) = memory_store();
    let config = LoaderConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            backoff_ms: 1,
        },
        ..loader_config(4)
    };

    store.faults().fail_on_transaction(0, 5);
    let err = Loader::new(handle, config).load(&small_tables()).await.unwrap_err();
    assert_eq!(err.chunk_failures(), vec![(0, 0, 4)]);
    assert_eq!(store.graph().read().await.count_by_label(Label::Transaction), 0);
}

#[tokio::test]
async fn test_concurrent_chunks_report_failures_and_rerun() {
    let (store, handle) = memory_store();
    let config = LoaderConfig {
        write_concurrency: 3,
        ..loader_config(4)
    };
    let tables = small_tables();
    let loader = Loader::new(handle, config);

    store.faults().fail_on_transaction(6, 1);
    let err = loader.load(&tables).await.unwrap_err();
    assert!(matches!(err, FraudGraphError::ChunksFailed { .. }));
    assert_eq!(err.chunk_failures(), vec![(1, 4, 8)]);
    let committed = err.committed().unwrap();
    assert_eq!(committed.chunks_committed, 2);
    assert_eq!(committed.transactions_created, 6);
    // the other chunks still ran
    assert_eq!(store.graph().read().await.count_by_label(Label::Transaction), 6);

    let failed: Vec<usize> = err.chunk_failures().iter().map(|f| f.0).collect();
    let rerun = loader.rerun_chunks(&tables.transactions, size(4), &failed).await.unwrap();
    assert_eq!(rerun.chunks_committed, 1);
    assert_eq!(rerun.transactions_created, 4);
    assert_eq!(store.graph().read().await.count_by_label(Label::Transaction), 10);
}

#[tokio::test]
async fn test_indexes_serve_chunk_lookups() {
    let (store, handle) = memory_store();
    Loader::new(handle, loader_config(3)).load(&small_tables()).await.unwrap();

    let graph = store.graph().read().await;
    assert!(graph.has_index(Label::Customer, "id"));
    assert!(graph.has_index(Label::Terminal, "id"));
    // one customer and one terminal lookup per row, none by scan
    assert_eq!(graph.stats().indexed(), 20);
    assert_eq!(graph.stats().scanned(), 0);
}

#[tokio::test]
async fn test_ingestion_without_indexes_scans() {
    let (store, handle) = memory_store();
    let loader = Loader::new(handle, loader_config(3));
    let tables = small_tables();
    loader.create_entities(EntityKind::Customer, &tables.customers).await.unwrap();
    loader.create_entities(EntityKind::Terminal, &tables.terminals).await.unwrap();

    loader
        .create_transactions_chunked(&tables.transactions, size(3))
        .await
        .unwrap();
    let graph = store.graph().read().await;
    assert_eq!(graph.stats().scanned(), 20);
    assert_eq!(graph.stats().indexed(), 0);
}

#[tokio::test]
async fn test_empty_transaction_table() {
    let (_, handle) = memory_store();
    let loader = Loader::new(handle, loader_config(4));
    let report = loader.create_transactions_chunked(&[], size(4)).await.unwrap();
    assert_eq!(report.chunks_committed, 0);
    assert_eq!(report.rows_attempted, 0);
}

#[tokio::test]
async fn test_clear_removes_everything() {
    let (store, handle) = memory_store();
    let loader = Loader::new(handle, loader_config(4));
    loader.load(&small_tables()).await.unwrap();

    let cleared = loader.clear().await.unwrap();
    assert_eq!(cleared.relationships_deleted, 20);
    assert_eq!(cleared.nodes_deleted, 15);
    {
        let graph = store.graph().read().await;
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
    }

    let again = loader.clear().await.unwrap();
    assert_eq!(again.nodes_deleted, 0);
}

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use fraudgraph::{GraphStore, InputTables, LoaderConfig, MemoryGraphStore, TransactionRow};
use std::sync::Arc;

pub fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn tx(id: i64, customer_id: i64, terminal_id: i64, amount: f64, datetime: &str) -> TransactionRow {
    TransactionRow {
        id,
        customer_id,
        terminal_id,
        amount,
        datetime: at(datetime),
        is_fraud: false,
    }
}

/// Embedded store plus a trait-object handle onto the same graph
pub fn memory_store() -> (MemoryGraphStore, Arc<dyn GraphStore>) {
    let store = MemoryGraphStore::default();
    let handle: Arc<dyn GraphStore> = Arc::new(store.clone());
    (store, handle)
}

pub fn loader_config(chunk_size: usize) -> LoaderConfig {
    LoaderConfig {
        chunk_size,
        ..LoaderConfig::default()
    }
}

/// 3 customers, 2 terminals, 10 transactions over 2018-06-01 and 2018-06-02
pub fn small_tables() -> InputTables {
    let transactions = (0..10)
        .map(|i| {
            let date = if i < 5 { "2018-06-01" } else { "2018-06-02" };
            tx(
                i,
                i % 3,
                i % 2,
                10.0 + i as f64,
                &format!("{} {:02}:15:00", date, i),
            )
        })
        .collect();
    InputTables {
        customers: vec![0, 1, 2],
        terminals: vec![0, 1],
        transactions,
    }
}

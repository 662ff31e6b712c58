//! Input tables
//!
//! Three CSV files with a header row, as written by the transaction
//! simulator:
//!
//! ```csv
//! CUSTOMER_ID
//! 0
//! ```
//!
//! ```csv
//! TERMINAL_ID
//! 0
//! ```
//!
//! ```csv
//! TRANSACTION_ID,TX_DATETIME,CUSTOMER_ID,TERMINAL_ID,TX_AMOUNT,TX_FRAUD
//! 0,2018-04-01 00:00:31,596,3156,57.16,0
//! ```
//!
//! Columns are matched by header name; any extra columns are ignored.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};
use std::io::Read;
use std::path::Path;
use tracing::info;

use crate::error::{FraudGraphError, Result};
use crate::model::TransactionRow;

pub const CUSTOMERS_FILE: &str = "customers.csv";
pub const TERMINALS_FILE: &str = "terminals.csv";
pub const TRANSACTIONS_FILE: &str = "transactions.csv";

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The three entity tables of one load
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputTables {
    pub customers: Vec<i64>,
    pub terminals: Vec<i64>,
    pub transactions: Vec<TransactionRow>,
}

impl InputTables {
    /// Read `customers.csv`, `terminals.csv` and `transactions.csv` from `dir`
    pub fn read_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let tables = Self {
            customers: read_customers(csv::Reader::from_path(dir.join(CUSTOMERS_FILE))?)?,
            terminals: read_terminals(csv::Reader::from_path(dir.join(TERMINALS_FILE))?)?,
            transactions: read_transactions(csv::Reader::from_path(dir.join(TRANSACTIONS_FILE))?)?,
        };
        info!(
            dir = %dir.display(),
            customers = tables.customers.len(),
            terminals = tables.terminals.len(),
            transactions = tables.transactions.len(),
            "read input tables"
        );
        Ok(tables)
    }
}

#[derive(Deserialize)]
struct CustomerRecord {
    #[serde(rename = "CUSTOMER_ID")]
    id: i64,
}

#[derive(Deserialize)]
struct TerminalRecord {
    #[serde(rename = "TERMINAL_ID")]
    id: i64,
}

#[derive(Deserialize)]
struct TransactionRecord {
    #[serde(rename = "TRANSACTION_ID")]
    id: i64,
    #[serde(rename = "CUSTOMER_ID")]
    customer_id: i64,
    #[serde(rename = "TERMINAL_ID")]
    terminal_id: i64,
    #[serde(rename = "TX_AMOUNT")]
    amount: f64,
    #[serde(rename = "TX_DATETIME", deserialize_with = "deserialize_datetime")]
    datetime: NaiveDateTime,
    #[serde(rename = "TX_FRAUD", deserialize_with = "deserialize_flag")]
    is_fraud: bool,
}

impl From<TransactionRecord> for TransactionRow {
    fn from(record: TransactionRecord) -> Self {
        TransactionRow {
            id: record.id,
            customer_id: record.customer_id,
            terminal_id: record.terminal_id,
            amount: record.amount,
            datetime: record.datetime,
            is_fraud: record.is_fraud,
        }
    }
}

fn deserialize_datetime<'de, D>(deserializer: D) -> std::result::Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveDateTime::parse_from_str(raw.trim(), DATETIME_FORMAT).map_err(serde::de::Error::custom)
}

fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match u8::deserialize(deserializer)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(serde::de::Error::custom(format!("TX_FRAUD must be 0 or 1, got {}", other))),
    }
}

pub fn read_customers<R: Read>(mut reader: csv::Reader<R>) -> Result<Vec<i64>> {
    reader
        .deserialize::<CustomerRecord>()
        .map(|r| r.map(|record| record.id).map_err(FraudGraphError::from))
        .collect()
}

pub fn read_terminals<R: Read>(mut reader: csv::Reader<R>) -> Result<Vec<i64>> {
    reader
        .deserialize::<TerminalRecord>()
        .map(|r| r.map(|record| record.id).map_err(FraudGraphError::from))
        .collect()
}

pub fn read_transactions<R: Read>(mut reader: csv::Reader<R>) -> Result<Vec<TransactionRow>> {
    reader
        .deserialize::<TransactionRecord>()
        .map(|r| r.map(TransactionRow::from).map_err(FraudGraphError::from))
        .collect()
}

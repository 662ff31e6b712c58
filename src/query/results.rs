//! Typed query result rows
//!
//! Each row type decodes itself from a [`Row`] by column name, so the same
//! code reads results from the HTTP store and the embedded store.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::QueryKind;
use crate::error::{FraudGraphError, Result};
use crate::store::{QueryResult, Row};

/// A row type that can be decoded from a statement result
pub trait FromRow: Sized {
    fn from_row(row: Row<'_>) -> Result<Self>;
}

pub fn decode_all<T: FromRow>(result: &QueryResult) -> Result<Vec<T>> {
    result.rows().map(T::from_row).collect()
}

fn column<'a>(row: Row<'a>, name: &str) -> Result<&'a Value> {
    row.get(name)
        .ok_or_else(|| FraudGraphError::Decode(format!("missing column `{}`", name)))
}

fn int(row: Row<'_>, name: &str) -> Result<i64> {
    let value = column(row, name)?;
    value
        .as_i64()
        .ok_or_else(|| FraudGraphError::Decode(format!("`{}` is not an integer: {}", name, value)))
}

fn count(row: Row<'_>, name: &str) -> Result<u64> {
    let value = column(row, name)?;
    value
        .as_u64()
        .ok_or_else(|| FraudGraphError::Decode(format!("`{}` is not a count: {}", name, value)))
}

fn float(row: Row<'_>, name: &str) -> Result<f64> {
    let value = column(row, name)?;
    value
        .as_f64()
        .ok_or_else(|| FraudGraphError::Decode(format!("`{}` is not a number: {}", name, value)))
}

fn string(row: Row<'_>, name: &str) -> Result<String> {
    let value = column(row, name)?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| FraudGraphError::Decode(format!("`{}` is not a string: {}", name, value)))
}

fn date(row: Row<'_>, name: &str) -> Result<NaiveDate> {
    let text = string(row, name)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .map_err(|e| FraudGraphError::Decode(format!("`{}` is not a date ({}): {}", name, e, text)))
}

/// Query 1: total paid by one customer on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerPayment {
    pub customer_id: i64,
    pub date: NaiveDate,
    pub total_amount: f64,
}

impl FromRow for CustomerPayment {
    fn from_row(row: Row<'_>) -> Result<Self> {
        Ok(Self {
            customer_id: int(row, "customer_id")?,
            date: date(row, "date")?,
            total_amount: float(row, "total_amount")?,
        })
    }
}

/// Query 2: a terminal with transactions above 1.5× its baseline average
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalAnomaly {
    pub terminal_id: i64,
    pub flagged: u64,
    pub baseline_average: f64,
}

impl FromRow for TerminalAnomaly {
    fn from_row(row: Row<'_>) -> Result<Self> {
        Ok(Self {
            terminal_id: int(row, "terminal_id")?,
            flagged: count(row, "flagged")?,
            baseline_average: float(row, "baseline")?,
        })
    }
}

/// Query 3: two customers linked by a path of the requested length
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoCustomerPair {
    pub customer_a: i64,
    pub customer_b: i64,
}

impl FromRow for CoCustomerPair {
    fn from_row(row: Row<'_>) -> Result<Self> {
        Ok(Self {
            customer_a: int(row, "customer_a")?,
            customer_b: int(row, "customer_b")?,
        })
    }
}

/// Query 4: flagged transactions in one period against all transactions of
/// that period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodFraudRate {
    pub period: String,
    pub flagged: u64,
    pub total: u64,
}

impl PeriodFraudRate {
    /// `flagged / total`, 0 for an empty period
    pub fn fraud_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.flagged as f64 / self.total as f64
        }
    }
}

impl FromRow for PeriodFraudRate {
    fn from_row(row: Row<'_>) -> Result<Self> {
        Ok(Self {
            period: string(row, "period")?,
            flagged: count(row, "flagged")?,
            total: count(row, "total")?,
        })
    }
}

/// Rows of any one query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "query", content = "rows", rename_all = "snake_case")]
pub enum QueryOutput {
    CustomerPayments(Vec<CustomerPayment>),
    TerminalAnomalies(Vec<TerminalAnomaly>),
    CoCustomers(Vec<CoCustomerPair>),
    PeriodFraudRates(Vec<PeriodFraudRate>),
}

impl QueryOutput {
    pub fn kind(&self) -> QueryKind {
        match self {
            QueryOutput::CustomerPayments(_) => QueryKind::CustomerPayments,
            QueryOutput::TerminalAnomalies(_) => QueryKind::TerminalAnomalies,
            QueryOutput::CoCustomers(_) => QueryKind::CoCustomers,
            QueryOutput::PeriodFraudRates(_) => QueryKind::PeriodFraudRates,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QueryOutput::CustomerPayments(rows) => rows.len(),
            QueryOutput::TerminalAnomalies(rows) => rows.len(),
            QueryOutput::CoCustomers(rows) => rows.len(),
            QueryOutput::PeriodFraudRates(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn headers(&self) -> &'static [&'static str] {
        match self {
            QueryOutput::CustomerPayments(_) => &["customer_id", "date", "total_amount"],
            QueryOutput::TerminalAnomalies(_) => &["terminal_id", "flagged", "baseline_average"],
            QueryOutput::CoCustomers(_) => &["customer_a", "customer_b"],
            QueryOutput::PeriodFraudRates(_) => &["period", "flagged", "total", "fraud_rate"],
        }
    }

    /// Rows formatted for display, aligned with `headers`
    pub fn display_rows(&self) -> Vec<Vec<String>> {
        match self {
            QueryOutput::CustomerPayments(rows) => rows
                .iter()
                .map(|r| vec![r.customer_id.to_string(), r.date.to_string(), format!("{:.2}", r.total_amount)])
                .collect(),
            QueryOutput::TerminalAnomalies(rows) => rows
                .iter()
                .map(|r| vec![r.terminal_id.to_string(), r.flagged.to_string(), format!("{:.2}", r.baseline_average)])
                .collect(),
            QueryOutput::CoCustomers(rows) => rows
                .iter()
                .map(|r| vec![r.customer_a.to_string(), r.customer_b.to_string()])
                .collect(),
            QueryOutput::PeriodFraudRates(rows) => rows
                .iter()
                .map(|r| {
                    vec![
                        r.period.clone(),
                        r.flagged.to_string(),
                        r.total.to_string(),
                        format!("{:.4}", r.fraud_rate()),
                    ]
                })
                .collect(),
        }
    }
}

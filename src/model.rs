//! Domain model for the payment graph
//!
//! Three node labels and two relationship types:
//!
//! ```text
//! (:Customer {id})-[:HAS_TX]->(:Transaction {id, amount, datetime, date, period, is_fraud})-[:PAYED_TO]->(:Terminal {id})
//! ```

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FraudGraphError, Result};

/// Node label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    Customer,
    Terminal,
    Transaction,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Customer => "Customer",
            Label::Terminal => "Terminal",
            Label::Transaction => "Transaction",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeType {
    /// Customer -> Transaction
    HasTx,
    /// Transaction -> Terminal
    PayedTo,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::HasTx => "HAS_TX",
            EdgeType::PayedTo => "PAYED_TO",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity tables that are loaded as plain id-only nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Customer,
    Terminal,
}

impl EntityKind {
    pub fn label(&self) -> Label {
        match self {
            EntityKind::Customer => Label::Customer,
            EntityKind::Terminal => Label::Terminal,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label().as_str())
    }
}

/// Granularity of the `period` bucket stored on each transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodGranularity {
    /// `2018-06-01`
    #[default]
    Day,
    /// ISO week, `2018-W22`
    Week,
    /// `2018-06`
    Month,
}

impl PeriodGranularity {
    /// Bucket label for a timestamp. Labels sort chronologically as strings.
    pub fn bucket(&self, datetime: &NaiveDateTime) -> String {
        let date = datetime.date();
        match self {
            PeriodGranularity::Day => date.format("%Y-%m-%d").to_string(),
            PeriodGranularity::Week => {
                let week = date.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            PeriodGranularity::Month => format!("{}-{:02}", date.year(), date.month()),
        }
    }
}

/// One row of the transactions table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub id: i64,
    pub customer_id: i64,
    pub terminal_id: i64,
    pub amount: f64,
    pub datetime: NaiveDateTime,
    pub is_fraud: bool,
}

impl TransactionRow {
    /// Reject rows that can never become a valid Transaction node.
    pub fn validate(&self) -> Result<()> {
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(FraudGraphError::InvalidRecord(format!(
                "transaction {} has invalid amount {}",
                self.id, self.amount
            )));
        }
        Ok(())
    }

    pub fn date(&self) -> NaiveDate {
        self.datetime.date()
    }

    /// Node payload with the derived `date` and `period` attributes.
    pub fn to_node(&self, granularity: PeriodGranularity) -> TransactionNode {
        TransactionNode {
            id: self.id,
            customer_id: self.customer_id,
            terminal_id: self.terminal_id,
            amount: self.amount,
            datetime: self.datetime,
            date: self.date(),
            period: granularity.bucket(&self.datetime),
            is_fraud: self.is_fraud,
        }
    }
}

/// Everything written for a single transaction row.
///
/// Serialized as-is into the `$rows` parameter of the chunk statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionNode {
    pub id: i64,
    pub customer_id: i64,
    pub terminal_id: i64,
    pub amount: f64,
    pub datetime: NaiveDateTime,
    pub date: NaiveDate,
    pub period: String,
    pub is_fraud: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_period_buckets() {
        let dt = at("2018-06-01 13:45:00");
        assert_eq!(PeriodGranularity::Day.bucket(&dt), "2018-06-01");
        assert_eq!(PeriodGranularity::Week.bucket(&dt), "2018-W22");
        assert_eq!(PeriodGranularity::Month.bucket(&dt), "2018-06");
    }

    #[test]
    fn test_iso_week_crosses_year() {
        let dt = at("2018-12-31 00:00:00");
        assert_eq!(PeriodGranularity::Week.bucket(&dt), "2019-W01");
    }

    #[test]
    fn test_row_validation() {
        let mut row = TransactionRow {
            id: 1,
            customer_id: 2,
            terminal_id: 3,
            amount: 10.5,
            datetime: at("2018-06-01 00:00:00"),
            is_fraud: false,
        };
        assert!(row.validate().is_ok());

        row.amount = -1.0;
        assert!(matches!(row.validate(), Err(FraudGraphError::InvalidRecord(_))));

        row.amount = f64::NAN;
        assert!(row.validate().is_err());
    }

    #[test]
    fn test_to_node_derives_date_and_period() {
        let row = TransactionRow {
            id: 7,
            customer_id: 1,
            terminal_id: 1,
            amount: 42.0,
            datetime: at("2018-06-02 23:59:59"),
            is_fraud: true,
        };
        let node = row.to_node(PeriodGranularity::Month);
        assert_eq!(node.date, NaiveDate::from_ymd_opt(2018, 6, 2).unwrap());
        assert_eq!(node.period, "2018-06");
        assert!(node.is_fraud);
    }

    #[test]
    fn test_labels() {
        assert_eq!(EntityKind::Customer.label(), Label::Customer);
        assert_eq!(EdgeType::PayedTo.to_string(), "PAYED_TO");
        assert_eq!(Label::Transaction.to_string(), "Transaction");
    }
}

//! Validated query parameters
//!
//! Every constructor rejects bad input with `QueryParameter` so a malformed
//! statement is never sent to the store.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{FraudGraphError, Result};

/// Length of the baseline window preceding `start` used for anomaly detection
pub const BASELINE_DAYS: u64 = 30;

/// A transaction is anomalous when its amount exceeds this multiple of the
/// terminal's baseline average
pub const ANOMALY_FACTOR: f64 = 1.5;

/// Largest accepted co-occurrence degree (path length 36)
pub const MAX_DEGREE: u32 = 8;

/// Degrees from this value up (path length 20 and more) log a cost warning
pub const EXPENSIVE_DEGREE: u32 = 4;

/// Inclusive date range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(FraudGraphError::QueryParameter(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// First day of the baseline window `[start - 30 days, start)`
    pub fn baseline_start(&self) -> NaiveDate {
        self.start
            .checked_sub_days(Days::new(BASELINE_DAYS))
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn in_baseline(&self, date: NaiveDate) -> bool {
        self.baseline_start() <= date && date < self.start
    }
}

/// Positive row limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit(u64);

impl Limit {
    pub fn new(value: i64) -> Result<Self> {
        if value <= 0 {
            return Err(FraudGraphError::QueryParameter(format!(
                "limit must be positive, got {}",
                value
            )));
        }
        Ok(Limit(value as u64))
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

/// Co-occurrence degree `k`, bounded to `0..=MAX_DEGREE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degree(u32);

impl Degree {
    pub fn new(value: i64) -> Result<Self> {
        if value < 0 {
            return Err(FraudGraphError::QueryParameter(format!(
                "degree k must be non-negative, got {}",
                value
            )));
        }
        if value > MAX_DEGREE as i64 {
            return Err(FraudGraphError::QueryParameter(format!(
                "degree k must be at most {}, got {}",
                MAX_DEGREE, value
            )));
        }
        Ok(Degree(value as u32))
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// Number of relationships between the two customers: `4k + 4`
    pub fn path_length(&self) -> u32 {
        4 * self.0 + 4
    }

    pub fn is_expensive(&self) -> bool {
        self.0 >= EXPENSIVE_DEGREE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_window_rejects_reversed_range() {
        assert!(DateWindow::new(d(2018, 7, 1), d(2018, 6, 1)).is_err());
        assert!(DateWindow::new(d(2018, 6, 1), d(2018, 6, 1)).is_ok());
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let w = DateWindow::new(d(2018, 6, 1), d(2018, 7, 1)).unwrap();
        assert!(w.contains(d(2018, 6, 1)));
        assert!(w.contains(d(2018, 7, 1)));
        assert!(!w.contains(d(2018, 7, 2)));
        assert!(!w.contains(d(2018, 5, 31)));
    }

    #[test]
    fn test_baseline_is_thirty_days_before_start() {
        let w = DateWindow::new(d(2018, 6, 1), d(2018, 7, 1)).unwrap();
        assert_eq!(w.baseline_start(), d(2018, 5, 2));
        assert!(w.in_baseline(d(2018, 5, 2)));
        assert!(w.in_baseline(d(2018, 5, 31)));
        assert!(!w.in_baseline(d(2018, 6, 1)));
        assert!(!w.in_baseline(d(2018, 5, 1)));
    }

    #[test]
    fn test_limit_must_be_positive() {
        assert!(Limit::new(0).is_err());
        assert!(Limit::new(-3).is_err());
        assert_eq!(Limit::new(5).unwrap().get(), 5);
    }

    #[test]
    fn test_degree_path_length() {
        assert_eq!(Degree::new(0).unwrap().path_length(), 4);
        assert_eq!(Degree::new(4).unwrap().path_length(), 20);
        assert!(Degree::new(-1).is_err());
        assert!(Degree::new(MAX_DEGREE as i64 + 1).is_err());
        assert!(Degree::new(5).unwrap().is_expensive());
        // the default degree already warns
        assert!(Degree::new(4).unwrap().is_expensive());
        assert!(!Degree::new(3).unwrap().is_expensive());
    }
}

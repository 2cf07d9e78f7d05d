//! Core data structures for access-log processing.
//!
//! Defines the column schema shared by every row of an input object, the
//! rows themselves, the date used to partition them, and processing
//! statistics.

use crate::constants::LOG_DATE_FORMAT;
use crate::error::{MaskerError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Ordered column names of one input object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl ColumnSchema {
    /// Build a schema from column names in header order.
    ///
    /// A duplicated name resolves to its first position.
    pub fn new(columns: Vec<String>) -> Self {
        let mut index = HashMap::with_capacity(columns.len());
        for (position, name) in columns.iter().enumerate() {
            index.entry(name.clone()).or_insert(position);
        }
        Self { columns, index }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// One log record: a value for every column of its schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    schema: Arc<ColumnSchema>,
    values: Vec<String>,
    line: u64,
}

impl Row {
    /// Create a row, rejecting values that do not line up with the schema
    pub fn new(schema: Arc<ColumnSchema>, values: Vec<String>, line: u64) -> Result<Self> {
        if values.len() != schema.len() {
            return Err(MaskerError::row_decode(
                line,
                format!(
                    "expected {} fields, found {}",
                    schema.len(),
                    values.len()
                ),
            ));
        }
        Ok(Self {
            schema,
            values,
            line,
        })
    }

    pub fn schema(&self) -> &Arc<ColumnSchema> {
        &self.schema
    }

    /// Line of the source log the row was read from
    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.schema
            .position(column)
            .map(|position| self.values[position].as_str())
    }

    /// Replace the value of a column; returns false if the schema lacks it
    pub fn set(&mut self, column: &str, value: String) -> bool {
        match self.schema.position(column) {
            Some(position) => {
                self.values[position] = value;
                true
            }
            None => false,
        }
    }

    /// Values in column order
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Iterate `(column, value)` pairs in column order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.schema
            .columns()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }
}

/// Calendar date partitioning rows into output objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogDate(NaiveDate);

impl LogDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Parse a date column value such as `2024-01-31`
    pub fn parse(value: &str) -> std::result::Result<Self, chrono::ParseError> {
        NaiveDate::parse_from_str(value.trim(), LOG_DATE_FORMAT).map(Self)
    }

    /// Resolve the date of a row from the given column
    pub fn from_row(row: &Row, column: &str) -> Result<Self> {
        let value = row.get(column).ok_or_else(|| {
            MaskerError::row_decode(row.line(), format!("log record must have {column}"))
        })?;
        Self::parse(value).map_err(|e| {
            MaskerError::row_decode(row.line(), format!("invalid date format '{value}': {e}"))
        })
    }

    /// Key path segment `YYYY/MM/DD/`
    pub fn key_path(&self) -> String {
        format!(
            "{:04}/{:02}/{:02}/",
            self.0.year(),
            self.0.month(),
            self.0.day()
        )
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for LogDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(LOG_DATE_FORMAT))
    }
}

/// Processing statistics for one input object
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_skipped: u64,
    pub outputs_committed: usize,
    pub outputs_failed: usize,
}

/// Result of processing one input object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Every output was committed
    Processed(ProcessingStats),
    /// The source object no longer exists; nothing was written
    Missing,
}

/// Counts over a batch of input objects
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub objects_processed: usize,
    pub objects_missing: usize,
    pub objects_failed: usize,
    pub rows_written: u64,
    pub rows_skipped: u64,
}

impl BatchSummary {
    pub fn has_failures(&self) -> bool {
        self.objects_failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Arc<ColumnSchema> {
        Arc::new(ColumnSchema::new(vec![
            "date".to_string(),
            "time".to_string(),
            "c-ip".to_string(),
        ]))
    }

    #[test]
    fn test_row_lookup_and_update() {
        let mut row = Row::new(
            schema(),
            vec!["2024-01-01".into(), "00:00:01".into(), "1.2.3.4".into()],
            1,
        )
        .unwrap();

        assert_eq!(row.get("c-ip"), Some("1.2.3.4"));
        assert_eq!(row.get("x-forwarded-for"), None);
        assert!(row.set("c-ip", "1.0.0.0".to_string()));
        assert!(!row.set("missing", "x".to_string()));
        assert_eq!(row.values()[2], "1.0.0.0");

        let columns: Vec<&str> = row.iter().map(|(column, _)| column).collect();
        assert_eq!(columns, vec!["date", "time", "c-ip"]);
    }

    #[test]
    fn test_row_rejects_field_count_mismatch() {
        let err = Row::new(schema(), vec!["2024-01-01".into()], 7).unwrap_err();
        match err {
            MaskerError::RowDecode { line, reason } => {
                assert_eq!(line, 7);
                assert!(reason.contains("expected 3 fields, found 1"));
            }
            other => panic!("Expected RowDecode error, got {other:?}"),
        }
    }

    #[test]
    fn test_log_date_key_path() {
        let date = LogDate::parse("2024-01-02").unwrap();
        assert_eq!(date.key_path(), "2024/01/02/");
        assert_eq!(date.to_string(), "2024-01-02");
    }

    #[test]
    fn test_log_date_from_row_errors() {
        let schema = Arc::new(ColumnSchema::new(vec!["time".to_string()]));
        let row = Row::new(schema, vec!["00:00:01".into()], 2).unwrap();
        assert!(LogDate::from_row(&row, "date").unwrap_err().is_row_level());

        let row = Row::new(
            Arc::new(ColumnSchema::new(vec!["date".to_string()])),
            vec!["yesterday".into()],
            3,
        )
        .unwrap();
        let err = LogDate::from_row(&row, "date").unwrap_err();
        assert!(err.to_string().contains("invalid date format 'yesterday'"));
        assert!(matches!(err, MaskerError::RowDecode { line: 3, .. }));
    }

    #[test]
    fn test_same_day_same_key() {
        let a = LogDate::parse("2024-03-09").unwrap();
        let b = LogDate::parse(" 2024-03-09 ").unwrap();
        assert_eq!(a, b);
    }
}

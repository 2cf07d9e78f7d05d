//! Routing of masked rows to one output object per log date.
//!
//! Output keys follow `{prefix}{YYYY}/{MM}/{DD}/{source_key}`, so processing
//! the same source twice overwrites the same objects.

use super::writer::{GzippedTsvSink, SinkOptions};
use crate::constants::DATE_COLUMN;
use crate::error::Result;
use crate::models::{ColumnSchema, LogDate, Row};
use crate::storage::{ObjectLocation, ObjectStore};

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// How the outputs of a dispatcher are finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Complete every upload
    Commit,
    /// Cancel every upload
    Abort,
}

/// Keys of the outputs finalized by [`LogDispatcher::finish`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub committed: Vec<String>,
    /// Outputs whose commit failed; their uploads were aborted
    pub failed: Vec<String>,
    pub aborted: Vec<String>,
    pub rows_written: u64,
}

/// Destination key of the rows of `source_key` dated `date`
pub fn output_key(prefix: &str, date: &LogDate, source_key: &str) -> String {
    format!("{}{}{}", prefix, date.key_path(), source_key)
}

/// Recover the source key from an output key.
///
/// Returns `None` unless `output_key` is `prefix`, a zero-padded
/// `YYYY/MM/DD/` date and a non-empty remainder.
pub fn source_key(prefix: &str, output_key: &str) -> Option<String> {
    let rest = output_key.strip_prefix(prefix)?;
    let mut segments = rest.splitn(4, '/');
    let (year, month, day, key) = (
        segments.next()?,
        segments.next()?,
        segments.next()?,
        segments.next()?,
    );
    if key.is_empty() {
        return None;
    }

    let date = LogDate::parse(&format!("{year}-{month}-{day}")).ok()?;
    // chrono accepts unpadded fields, the key convention does not
    (date.key_path() == format!("{year}/{month}/{day}/")).then(|| key.to_string())
}

/// Sends rows to lazily opened per-date sinks
pub struct LogDispatcher {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    source_key: String,
    schema: Arc<ColumnSchema>,
    date_column: String,
    options: SinkOptions,
    sinks: Vec<(LogDate, GzippedTsvSink)>,
    positions: HashMap<LogDate, usize>,
}

impl LogDispatcher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        source_key: impl Into<String>,
        schema: Arc<ColumnSchema>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
            source_key: source_key.into(),
            schema,
            date_column: DATE_COLUMN.to_string(),
            options: SinkOptions::default(),
            sinks: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn with_date_column(mut self, column: impl Into<String>) -> Self {
        self.date_column = column.into();
        self
    }

    pub fn with_options(mut self, options: SinkOptions) -> Self {
        self.options = options;
        self
    }

    /// Number of outputs opened so far
    pub fn output_count(&self) -> usize {
        self.sinks.len()
    }

    /// Keys of the opened outputs, in the order they were opened
    pub fn output_keys(&self) -> Vec<&str> {
        self.sinks.iter().map(|(_, sink)| sink.key()).collect()
    }

    pub fn output_key(&self, date: &LogDate) -> String {
        output_key(&self.prefix, date, &self.source_key)
    }

    /// Write `row` to the output of its date.
    ///
    /// Returns `Ok(false)` when the row has no usable date; such rows are
    /// logged and dropped.
    pub fn write_row(&mut self, row: &Row) -> Result<bool> {
        let date = match LogDate::from_row(row, &self.date_column) {
            Ok(date) => date,
            Err(e) => {
                warn!("Skipping record of {}: {}", self.source_key, e);
                return Ok(false);
            }
        };

        self.sink_for(date)?.write_row(row)?;
        Ok(true)
    }

    fn sink_for(&mut self, date: LogDate) -> Result<&mut GzippedTsvSink> {
        let position = match self.positions.get(&date) {
            Some(&position) => position,
            None => {
                let location = ObjectLocation::new(&self.bucket, self.output_key(&date));
                debug!("Opening output {} for rows dated {}", location, date);
                let sink = GzippedTsvSink::open(
                    Arc::clone(&self.store),
                    location,
                    &self.schema,
                    &self.options,
                )?;
                self.sinks.push((date, sink));
                self.positions.insert(date, self.sinks.len() - 1);
                self.sinks.len() - 1
            }
        };
        Ok(&mut self.sinks[position].1)
    }

    /// Commit or abort every output, in the order they were opened.
    ///
    /// A failed commit does not stop the remaining outputs from committing.
    pub fn finish(self, completion: Completion) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        for (date, sink) in self.sinks {
            let key = sink.key().to_string();
            match completion {
                Completion::Commit => match sink.close() {
                    Ok(rows) => {
                        debug!("Committed {} ({} rows dated {})", key, rows, date);
                        summary.rows_written += rows;
                        summary.committed.push(key);
                    }
                    Err(e) => {
                        error!("Failed to commit {}: {}", key, e);
                        summary.failed.push(key);
                    }
                },
                Completion::Abort => {
                    if let Err(e) = sink.abort() {
                        error!("Failed to abort {}: {}", key, e);
                    }
                    summary.aborted.push(key);
                }
            }
        }
        summary
    }
}

impl std::fmt::Debug for LogDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogDispatcher")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("source_key", &self.source_key)
            .field("outputs", &self.output_keys())
            .finish()
    }
}

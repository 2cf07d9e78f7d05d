//! Error handling for access-log masking operations.
//!
//! Separates per-row failures that the pipeline recovers from (a row is
//! skipped) from failures that abort every output of the object in flight.

use crate::storage::StoreError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaskerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("No usable field list in access log '{key}': {reason}")]
    Schema { key: String, reason: String },

    #[error("Invalid log record at line {line}: {reason}")]
    RowDecode { line: u64, reason: String },

    #[error("Invalid IP address in field '{field}': {value}")]
    InvalidAddress { field: String, value: String },

    #[error("Multipart upload failed to {operation} '{key}': {source}")]
    Upload {
        key: String,
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Multipart upload of '{key}' is missing part {part_number}, which failed to upload")]
    IncompleteUpload { key: String, part_number: u32 },

    #[error("Processing of '{key}' was cancelled")]
    Cancelled { key: String },

    #[error("Multipart upload of '{key}' exceeds the limit of {limit} parts")]
    PartLimitExceeded { key: String, limit: u32 },

    #[error("Failed to commit {} of the outputs of '{key}': {}", .failed.len(), .failed.join(", "))]
    PartialCommit { key: String, failed: Vec<String> },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid queue message: {reason}")]
    Notification { reason: String },

    #[error("Processing task for '{key}' did not complete: {reason}")]
    TaskFailed { key: String, reason: String },
}

impl MaskerError {
    /// Create a schema error for the given source object
    pub fn schema(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn row_decode(line: u64, reason: impl Into<String>) -> Self {
        Self::RowDecode {
            line,
            reason: reason.into(),
        }
    }

    pub fn invalid_address(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidAddress {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an upload error for a remote multipart operation
    pub fn upload(key: impl Into<String>, operation: &'static str, source: StoreError) -> Self {
        Self::Upload {
            key: key.into(),
            operation,
            source,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn notification(reason: impl Into<String>) -> Self {
        Self::Notification {
            reason: reason.into(),
        }
    }

    /// Recover an error that crossed a `std::io::Write` boundary.
    ///
    /// Store failures inside the upload sink travel through the gzip and TSV
    /// layers as `io::Error`; this restores the original variant.
    pub fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<MaskerError>()) {
            return Self::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<MaskerError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Self::Io(io::Error::new(kind, other)),
            None => Self::Io(kind.into()),
        }
    }

    /// Like [`MaskerError::from_io`] for errors raised by a `csv::Writer`
    pub fn from_csv(err: csv::Error) -> Self {
        if !err.is_io_error() {
            return Self::Csv(err);
        }
        match err.into_kind() {
            csv::ErrorKind::Io(io_err) => Self::from_io(io_err),
            kind => Self::Io(io::Error::other(format!("{kind:?}"))),
        }
    }

    /// Whether the failure only affects a single row.
    ///
    /// Everything else aborts the outputs of the object being processed.
    pub fn is_row_level(&self) -> bool {
        matches!(self, Self::RowDecode { .. })
    }
}

pub type Result<T> = std::result::Result<T, MaskerError>;

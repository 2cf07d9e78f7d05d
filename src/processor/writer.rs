//! Gzipped TSV output objects.
//!
//! A sink layers a tab-delimited `csv::Writer` over a `GzEncoder` over a
//! [`MultipartUpload`], so rows are compressed and uploaded as they are
//! written. Each sink numbers its own rows in a leading `row_num` column.

use crate::constants::{
    DEFAULT_COMPRESSION_LEVEL, FIELD_DELIMITER, MIN_PART_SIZE_BYTES, ROW_NUMBER_COLUMN,
};
use crate::error::{MaskerError, Result};
use crate::models::{ColumnSchema, Row};
use crate::storage::{MultipartUpload, ObjectLocation, ObjectStore, ServerSideEncryption};

use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io;
use std::sync::Arc;
use tracing::{debug, error};

type TsvWriter = csv::Writer<GzEncoder<MultipartUpload>>;

/// Settings shared by every sink of a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkOptions {
    pub min_part_size: usize,
    pub compression_level: u32,
    pub encryption: ServerSideEncryption,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            min_part_size: MIN_PART_SIZE_BYTES,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            encryption: ServerSideEncryption::default(),
        }
    }
}

/// One gzip-compressed TSV object being uploaded
pub struct GzippedTsvSink {
    key: String,
    writer: Option<TsvWriter>,
    next_row_number: u64,
}

impl GzippedTsvSink {
    /// Start the upload and write the header row (`row_num` then `schema`)
    pub fn open(
        store: Arc<dyn ObjectStore>,
        location: ObjectLocation,
        schema: &ColumnSchema,
        options: &SinkOptions,
    ) -> Result<Self> {
        let key = location.key.clone();
        let upload = MultipartUpload::open(
            store,
            location,
            options.encryption,
            options.min_part_size,
        )?;
        let encoder = GzEncoder::new(upload, Compression::new(options.compression_level));
        let writer = WriterBuilder::new()
            .delimiter(FIELD_DELIMITER)
            .from_writer(encoder);

        let mut sink = Self {
            key,
            writer: Some(writer),
            next_row_number: 1,
        };

        let header = std::iter::once(ROW_NUMBER_COLUMN)
            .chain(schema.columns().iter().map(String::as_str));
        if let Err(e) = sink.write_record(header) {
            if let Err(abort_err) = sink.abort() {
                error!("Failed to abort output after header error: {}", abort_err);
            }
            return Err(e);
        }
        debug!("Opened output sink for {}", sink.key);
        Ok(sink)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn rows_written(&self) -> u64 {
        self.next_row_number - 1
    }

    /// Append `row` with the next row number.
    ///
    /// The counter only moves once the row has been accepted.
    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        let row_number = self.next_row_number.to_string();
        let record =
            std::iter::once(row_number.as_str()).chain(row.values().iter().map(String::as_str));
        self.write_record(record)?;
        self.next_row_number += 1;
        Ok(())
    }

    fn write_record<'a>(&mut self, record: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(MaskerError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("output {} is already finalized", self.key),
            )));
        };
        writer.write_record(record).map_err(MaskerError::from_csv)
    }

    /// Flush every layer and complete the upload.
    ///
    /// Returns the number of rows written. On failure the upload is aborted
    /// before the error is returned.
    pub fn close(mut self) -> Result<u64> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(0);
        };
        let rows = self.rows_written();

        if let Err(e) = writer.flush() {
            let err = MaskerError::from_io(e);
            self.discard(writer);
            return Err(err);
        }
        let mut encoder = match writer.into_inner() {
            Ok(encoder) => encoder,
            Err(e) => {
                let err = io::Error::new(e.error().kind(), e.error().to_string());
                self.discard(e.into_inner());
                return Err(MaskerError::from_io(err));
            }
        };

        if let Err(e) = encoder.try_finish() {
            let err = MaskerError::from_io(e);
            encoder.get_ref().request_abort();
            if let Err(abort_err) = encoder.get_mut().abort() {
                error!("{}", abort_err);
            }
            return Err(err);
        }
        encoder.get_mut().close()?;

        debug!("Committed {} rows to {}", rows, self.key);
        Ok(rows)
    }

    /// Cancel the upload without flushing buffered rows
    pub fn abort(mut self) -> Result<()> {
        match self.writer.take() {
            Some(writer) => Self::cancel(writer),
            None => Ok(()),
        }
    }

    fn discard(&self, writer: TsvWriter) {
        if let Err(e) = Self::cancel(writer) {
            error!("Failed to abort output {}: {}", self.key, e);
        }
    }

    fn cancel(writer: TsvWriter) -> Result<()> {
        // stop the buffered layers from sending further parts
        writer.get_ref().get_ref().request_abort();
        match writer.into_inner() {
            Ok(mut encoder) => encoder.get_mut().abort(),
            // dropping the writer aborts the upload
            Err(_) => Ok(()),
        }
    }
}

impl Drop for GzippedTsvSink {
    fn drop(&mut self) {
        if let Some(writer) = &self.writer {
            writer.get_ref().get_ref().request_abort();
        }
    }
}

impl std::fmt::Debug for GzippedTsvSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzippedTsvSink")
            .field("key", &self.key)
            .field("open", &self.writer.is_some())
            .field("rows_written", &self.rows_written())
            .finish()
    }
}

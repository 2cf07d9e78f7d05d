//! Lazy decoding of access-log records into rows.
//!
//! The translated stream from [`crate::header`] is read by a tab-delimited
//! `csv` reader one record at a time, so memory use does not depend on the
//! size of the input.

use crate::constants::FIELD_DELIMITER;
use crate::error::{MaskerError, Result};
use crate::header::{FieldsHeader, TranslatedReader, translate_header};
use crate::models::{ColumnSchema, Row};
use csv::{ReaderBuilder, StringRecord};
use std::io::BufRead;
use std::sync::Arc;

/// Iterator over the rows of one access-log stream
///
/// Yields `Err(MaskerError::RowDecode)` for a malformed record, after which
/// iteration continues; any other error ends the stream.
pub struct RecordDecoder<R: BufRead> {
    reader: csv::Reader<TranslatedReader<R>>,
    schema: Arc<ColumnSchema>,
    header: FieldsHeader,
    record: StringRecord,
    finished: bool,
}

impl<R: BufRead> RecordDecoder<R> {
    /// Resolve the column schema from the preamble of `input`.
    ///
    /// Fails with a schema error before any data row is read if the stream
    /// carries no field list.
    pub fn new(input: R, key: &str) -> Result<Self> {
        let (header, translated) = translate_header(input, key)?;

        let mut reader = ReaderBuilder::new()
            .delimiter(FIELD_DELIMITER)
            .has_headers(true)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(translated);

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| MaskerError::schema(key, format!("unreadable header line: {e}")))?
            .iter()
            .map(str::to_string)
            .collect();
        if columns != header.columns {
            return Err(MaskerError::schema(
                key,
                format!("field list contains unsupported characters: {columns:?}"),
            ));
        }

        Ok(Self {
            reader,
            schema: Arc::new(ColumnSchema::new(columns)),
            header,
            record: StringRecord::new(),
            finished: false,
        })
    }

    pub fn schema(&self) -> &Arc<ColumnSchema> {
        &self.schema
    }

    pub fn header(&self) -> &FieldsHeader {
        &self.header
    }

    /// Line number of `record` in the original (untranslated) input
    fn source_line(&self) -> u64 {
        let translated_line = self
            .record
            .position()
            .map(|position| position.line())
            .unwrap_or_default();
        // the header line stands in for the whole preamble
        translated_line + self.header.lines_consumed - 1
    }
}

impl<R: BufRead> Iterator for RecordDecoder<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.reader.read_record(&mut self.record) {
            Ok(false) => {
                self.finished = true;
                None
            }
            Ok(true) => {
                let values = self.record.iter().map(str::to_string).collect();
                Some(Row::new(
                    Arc::clone(&self.schema),
                    values,
                    self.source_line(),
                ))
            }
            Err(e) if e.is_io_error() => {
                self.finished = true;
                Some(Err(e.into()))
            }
            Err(e) => {
                let line = e
                    .position()
                    .map(|position| position.line() + self.header.lines_consumed - 1)
                    .unwrap_or_default();
                Some(Err(MaskerError::row_decode(line, e.to_string())))
            }
        }
    }
}

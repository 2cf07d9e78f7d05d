//! CloudFront access-log header translation.
//!
//! CloudFront logs open with a `#Version:` line followed by a `#Fields:`
//! line whose remainder lists the column names separated by spaces. Data
//! rows are tab-separated. To let a standard delimited-text reader consume
//! the stream, the field list is rewritten into a tab-separated header line
//! and chained in front of the untouched remainder of the input.

use crate::constants::{FIELD_DELIMITER, FIELDS_MARKER, VERSION_MARKER};
use crate::error::{MaskerError, Result};
use std::io::{BufRead, Chain, Cursor, Read};
use tracing::debug;

/// Header read from the preamble of an access-log stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldsHeader {
    /// Log format version, if a `#Version:` line was present
    pub version: Option<String>,

    /// Column names in declaration order
    pub columns: Vec<String>,

    /// Number of preamble lines consumed, including the `#Fields:` line
    pub lines_consumed: u64,
}

impl FieldsHeader {
    /// The field list as a tab-separated header line
    pub fn header_line(&self) -> Vec<u8> {
        let mut line = self.columns.join(&char::from(FIELD_DELIMITER).to_string());
        line.push('\n');
        line.into_bytes()
    }
}

/// Consume the preamble of `input` up to and including the `#Fields:` line.
///
/// Directive lines other than `#Fields:` and blank lines are skipped. A data
/// line before the field list, or the end of the stream, is a schema error.
pub fn read_fields_header<R: BufRead>(input: &mut R, key: &str) -> Result<FieldsHeader> {
    let mut version = None;
    let mut lines_consumed = 0;
    let mut line = String::new();

    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(MaskerError::schema(
                key,
                format!("reached end of input before a {FIELDS_MARKER} line"),
            ));
        }
        lines_consumed += 1;
        let trimmed = line.trim_end_matches(['\r', '\n']);

        if let Some(fields) = trimmed.strip_prefix(FIELDS_MARKER) {
            let columns: Vec<String> = fields.split_whitespace().map(str::to_string).collect();
            if columns.is_empty() {
                return Err(MaskerError::schema(
                    key,
                    format!("{FIELDS_MARKER} line at line {lines_consumed} lists no columns"),
                ));
            }
            debug!(
                "Resolved {} columns for {} after {} header lines",
                columns.len(),
                key,
                lines_consumed
            );
            return Ok(FieldsHeader {
                version,
                columns,
                lines_consumed,
            });
        }

        if let Some(value) = trimmed.strip_prefix(VERSION_MARKER) {
            version = Some(value.trim().to_string());
        } else if trimmed.trim().is_empty() || trimmed.starts_with('#') {
            continue;
        } else {
            return Err(MaskerError::schema(
                key,
                format!("data row at line {lines_consumed} precedes the {FIELDS_MARKER} line"),
            ));
        }
    }
}

/// Header line chained in front of the unread remainder of a log stream
pub type TranslatedReader<R> = Chain<Cursor<Vec<u8>>, R>;

/// Rewrite the preamble of `input` into a single tab-separated header line.
///
/// Only the preamble is read eagerly; the returned reader streams the rest of
/// `input` as-is.
pub fn translate_header<R: BufRead>(
    mut input: R,
    key: &str,
) -> Result<(FieldsHeader, TranslatedReader<R>)> {
    let header = read_fields_header(&mut input, key)?;
    let translated = Cursor::new(header.header_line()).chain(input);
    Ok((header, translated))
}

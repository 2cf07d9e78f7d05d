//! Integration tests for the processor module
//!
//! Runs the complete pipeline against an in-memory store holding gzipped
//! CloudFront logs.

pub mod basic_processing;
pub mod batch_processing;

use crate::config::MaskerConfig;
use crate::processor::LogProcessor;
use crate::storage::{InMemoryStore, ObjectLocation};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use std::sync::Arc;

pub const SOURCE_BUCKET: &str = "raw-logs";
pub const DESTINATION_BUCKET: &str = "masked-logs";
pub const PREFIX: &str = "cloudfront/";
pub const SOURCE_KEY: &str = "E2ABC123.2024-01-01-00.1a2b3c4d.gz";

pub const PREAMBLE: &str = "#Version: 1.0\n#Fields: date time c-ip cs-uri-stem x-forwarded-for\n";

pub fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

pub fn gunzip(bytes: &[u8]) -> String {
    let mut text = String::new();
    GzDecoder::new(bytes).read_to_string(&mut text).unwrap();
    text
}

/// A CloudFront log with the standard preamble followed by `rows`
pub fn log_text(rows: &[&str]) -> String {
    let mut text = PREAMBLE.to_string();
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    text
}

pub fn config() -> MaskerConfig {
    MaskerConfig::new(SOURCE_BUCKET, DESTINATION_BUCKET)
        .with_key_prefix(PREFIX)
        .with_min_part_size(64)
}

/// Store holding `source_key` with `text` gzipped, and a processor over it
pub fn setup(source_key: &str, text: &str) -> (Arc<InMemoryStore>, LogProcessor) {
    let store = Arc::new(InMemoryStore::new());
    store.put_object(ObjectLocation::new(SOURCE_BUCKET, source_key), gzip(text));
    let processor = LogProcessor::new(store.clone(), config());
    (store, processor)
}

/// Destination key for `source_key` on `date` (`YYYY/MM/DD`)
pub fn output_key(date: &str, source_key: &str) -> String {
    format!("{PREFIX}{date}/{source_key}")
}

/// Lines of a committed output object
pub fn output_lines(store: &InMemoryStore, key: &str) -> Vec<String> {
    let bytes = store
        .object(&ObjectLocation::new(DESTINATION_BUCKET, key))
        .unwrap_or_else(|| panic!("no output object {key}"));
    gunzip(&bytes).lines().map(str::to_string).collect()
}

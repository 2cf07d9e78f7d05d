//! Access Log Masker Library
//!
//! Anonymises CloudFront access logs stored in S3. Each source log is
//! streamed, decompressed and decoded record by record. The client address
//! fields are masked (IPv4 to /8, IPv6 to /32), and the records are split
//! by their date into gzipped TSV objects in a destination bucket. Outputs
//! are written with multipart uploads and are either all committed or all
//! aborted.
//!
//! This library provides tools for:
//! - Decoding the `#Fields:` preamble and the tab-separated records
//! - Masking IPv4 and IPv6 addresses in the configured fields
//! - Streaming rows into gzipped multipart uploads, one per log date
//! - Processing many source objects concurrently with per-object isolation
//! - Parsing SQS batches of S3 object-created notifications

pub mod cli;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod error;
pub mod header;
pub mod masking;
pub mod models;
pub mod notification;
pub mod processor;
pub mod storage;

pub use config::MaskerConfig;
pub use decoder::RecordDecoder;
pub use error::{MaskerError, Result};
pub use masking::FieldMasker;
pub use models::{BatchSummary, ColumnSchema, LogDate, ProcessOutcome, ProcessingStats, Row};
pub use processor::LogProcessor;
pub use processor::dispatcher::{Completion, DispatchSummary, LogDispatcher};
pub use processor::writer::{GzippedTsvSink, SinkOptions};
pub use storage::{
    InMemoryStore, MultipartUpload, ObjectLocation, ObjectStore, RemoteStore,
    ServerSideEncryption, StoreError,
};

//! Application constants for the access-log masker
//!
//! Log format markers, upload limits, and defaults used throughout the
//! pipeline.

// =============================================================================
// CloudFront Log Format
// =============================================================================

/// Prefix of the metadata line that precedes the field list
pub const VERSION_MARKER: &str = "#Version:";

/// Prefix of the line carrying the space-separated column names
pub const FIELDS_MARKER: &str = "#Fields:";

/// Column delimiter of data rows, and of the translated header line
pub const FIELD_DELIMITER: u8 = b'\t';

/// Column holding the calendar date of a record
pub const DATE_COLUMN: &str = "date";

/// Format of the date column (`2024-01-31`)
pub const LOG_DATE_FORMAT: &str = "%Y-%m-%d";

/// Placeholder CloudFront writes for an absent value
pub const ABSENT_VALUE: &str = "-";

// =============================================================================
// Masking
// =============================================================================

/// Fields carrying client addresses
pub const DEFAULT_MASKED_FIELDS: &[&str] = &["c-ip", "x-forwarded-for"];

/// Leading bits kept from an IPv4 address
pub const IPV4_PREFIX_LEN: u32 = 8;

/// Leading bits kept from an IPv6 address
pub const IPV6_PREFIX_LEN: u32 = 32;

// =============================================================================
// Output
// =============================================================================

/// Synthetic leading column numbering the rows of each output object
pub const ROW_NUMBER_COLUMN: &str = "row_num";

/// Default gzip level of output objects
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

// =============================================================================
// Multipart Uploads
// =============================================================================

/// Smallest part S3 accepts, except for the last part of an upload
pub const MIN_PART_SIZE_BYTES: usize = 5 * 1024 * 1024;

/// Most parts a single S3 multipart upload may have
pub const MAX_PART_COUNT: u32 = 10_000;

/// Default number of source objects processed at once
pub const DEFAULT_MAX_CONCURRENT_OBJECTS: usize = 4;

// =============================================================================
// Environment
// =============================================================================

pub mod env_vars {
    pub const SOURCE_BUCKET_NAME: &str = "SOURCE_BUCKET_NAME";
    pub const DESTINATION_BUCKET_NAME: &str = "DESTINATION_BUCKET_NAME";
    pub const DESTINATION_KEY_PREFIX: &str = "DESTINATION_KEY_PREFIX";
    pub const MIN_PART_SIZE: &str = "MASKER_MIN_PART_SIZE";
    pub const COMPRESSION_LEVEL: &str = "MASKER_COMPRESSION_LEVEL";
    pub const MAX_CONCURRENT_OBJECTS: &str = "MASKER_MAX_CONCURRENT_OBJECTS";
}

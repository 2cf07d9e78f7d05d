//! Configuration management and validation.
//!
//! Buckets, key layout, and upload tuning for the masking pipeline, read
//! from the environment the way the deployed function receives them.

use crate::constants::{
    DATE_COLUMN, DEFAULT_COMPRESSION_LEVEL, DEFAULT_MASKED_FIELDS,
    DEFAULT_MAX_CONCURRENT_OBJECTS, MIN_PART_SIZE_BYTES, env_vars,
};
use crate::error::{MaskerError, Result};
use crate::processor::writer::SinkOptions;
use crate::storage::ServerSideEncryption;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// Main configuration for the masking pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskerConfig {
    /// Bucket holding the raw CloudFront logs
    pub source_bucket: String,

    /// Bucket receiving the masked per-date objects
    pub destination_bucket: String,

    /// Prepended to every output key, e.g. `cloudfront/`
    pub destination_key_prefix: String,

    /// Columns whose IP addresses are masked
    pub masked_fields: Vec<String>,

    /// Column holding the `YYYY-MM-DD` date used to split outputs
    pub date_column: String,

    /// Bytes buffered before a part is uploaded
    pub min_part_size: usize,

    /// Gzip level of output objects (0-9)
    pub compression_level: u32,

    pub server_side_encryption: ServerSideEncryption,

    /// Source objects processed at the same time
    pub max_concurrent_objects: usize,
}

impl Default for MaskerConfig {
    fn default() -> Self {
        Self {
            source_bucket: String::new(),
            destination_bucket: String::new(),
            destination_key_prefix: String::new(),
            masked_fields: DEFAULT_MASKED_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
            date_column: DATE_COLUMN.to_string(),
            min_part_size: MIN_PART_SIZE_BYTES,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            server_side_encryption: ServerSideEncryption::Aes256,
            max_concurrent_objects: DEFAULT_MAX_CONCURRENT_OBJECTS,
        }
    }
}

impl MaskerConfig {
    /// Create a configuration for the given buckets with default tuning
    pub fn new(source_bucket: impl Into<String>, destination_bucket: impl Into<String>) -> Self {
        Self {
            source_bucket: source_bucket.into(),
            destination_bucket: destination_bucket.into(),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.destination_key_prefix = prefix.into();
        self
    }

    pub fn with_masked_fields(mut self, fields: Vec<String>) -> Self {
        self.masked_fields = fields;
        self
    }

    pub fn with_date_column(mut self, column: impl Into<String>) -> Self {
        self.date_column = column.into();
        self
    }

    /// Set the part size; values below the S3 minimum only suit test stores
    pub fn with_min_part_size(mut self, bytes: usize) -> Self {
        self.min_part_size = bytes;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_encryption(mut self, encryption: ServerSideEncryption) -> Self {
        self.server_side_encryption = encryption;
        self
    }

    pub fn with_max_concurrent_objects(mut self, max_objects: usize) -> Self {
        self.max_concurrent_objects = max_objects;
        self
    }

    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from a variable lookup.
    ///
    /// Bucket names are required. Unlike the builder methods, a part size
    /// read here must meet the S3 minimum.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| MaskerError::configuration(format!("{name} must be set")))
        };

        let mut config = Self::new(
            required(env_vars::SOURCE_BUCKET_NAME)?,
            required(env_vars::DESTINATION_BUCKET_NAME)?,
        );
        if let Some(prefix) = lookup(env_vars::DESTINATION_KEY_PREFIX) {
            config.destination_key_prefix = prefix;
        }
        if let Some(size) = parse_var(&lookup, env_vars::MIN_PART_SIZE)? {
            if size < MIN_PART_SIZE_BYTES {
                return Err(MaskerError::configuration(format!(
                    "{} must be at least {} bytes, got {}",
                    env_vars::MIN_PART_SIZE,
                    MIN_PART_SIZE_BYTES,
                    size
                )));
            }
            config.min_part_size = size;
        }
        if let Some(level) = parse_var(&lookup, env_vars::COMPRESSION_LEVEL)? {
            config.compression_level = level;
        }
        if let Some(max_objects) = parse_var(&lookup, env_vars::MAX_CONCURRENT_OBJECTS)? {
            config.max_concurrent_objects = max_objects;
        }

        config.validate()?;
        debug!(
            "Loaded configuration: {} -> {} (prefix '{}')",
            config.source_bucket, config.destination_bucket, config.destination_key_prefix
        );
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.source_bucket.is_empty() {
            return Err(MaskerError::configuration("source bucket must not be empty"));
        }
        if self.destination_bucket.is_empty() {
            return Err(MaskerError::configuration(
                "destination bucket must not be empty",
            ));
        }
        if self.min_part_size == 0 {
            return Err(MaskerError::configuration("min_part_size must be positive"));
        }
        if self.compression_level > 9 {
            return Err(MaskerError::configuration(format!(
                "compression level must be between 0 and 9, got {}",
                self.compression_level
            )));
        }
        if self.max_concurrent_objects == 0 {
            return Err(MaskerError::configuration(
                "max_concurrent_objects must be at least 1",
            ));
        }
        if self.date_column.is_empty() {
            return Err(MaskerError::configuration("date column must not be empty"));
        }
        Ok(())
    }

    /// Upload settings of the output sinks
    pub fn sink_options(&self) -> SinkOptions {
        SinkOptions {
            min_part_size: self.min_part_size,
            compression_level: self.compression_level,
            encryption: self.server_side_encryption,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| {
                MaskerError::configuration(format!("invalid {name} '{value}': {e}"))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const BUCKETS: [(&str, &str); 2] = [
        ("SOURCE_BUCKET_NAME", "raw-logs"),
        ("DESTINATION_BUCKET_NAME", "masked-logs"),
    ];

    #[test]
    fn test_default_config() {
        let config = MaskerConfig::default();
        assert_eq!(config.masked_fields, vec!["c-ip", "x-forwarded-for"]);
        assert_eq!(config.date_column, "date");
        assert_eq!(config.min_part_size, 5 * 1024 * 1024);
        assert_eq!(config.compression_level, 6);
        assert_eq!(config.server_side_encryption, ServerSideEncryption::Aes256);
        assert_eq!(config.max_concurrent_objects, 4);
        // buckets have no default
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup_with_buckets_only() {
        let config = MaskerConfig::from_lookup(lookup(&BUCKETS)).unwrap();
        assert_eq!(config.source_bucket, "raw-logs");
        assert_eq!(config.destination_bucket, "masked-logs");
        assert_eq!(config.destination_key_prefix, "");
        assert_eq!(config.min_part_size, MIN_PART_SIZE_BYTES);
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let mut vars = BUCKETS.to_vec();
        vars.extend([
            ("DESTINATION_KEY_PREFIX", "cloudfront/"),
            ("MASKER_MIN_PART_SIZE", "8388608"),
            ("MASKER_COMPRESSION_LEVEL", "9"),
            ("MASKER_MAX_CONCURRENT_OBJECTS", " 16 "),
        ]);
        let config = MaskerConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.destination_key_prefix, "cloudfront/");
        assert_eq!(config.min_part_size, 8 * 1024 * 1024);
        assert_eq!(config.compression_level, 9);
        assert_eq!(config.max_concurrent_objects, 16);
    }

    #[test]
    fn test_missing_bucket_is_reported() {
        let err = MaskerConfig::from_lookup(lookup(&[("SOURCE_BUCKET_NAME", "raw")])).unwrap_err();
        assert!(err.to_string().contains("DESTINATION_BUCKET_NAME must be set"));

        let err = MaskerConfig::from_lookup(lookup(&[
            ("SOURCE_BUCKET_NAME", " "),
            ("DESTINATION_BUCKET_NAME", "masked"),
        ]))
        .unwrap_err();
        assert!(matches!(err, MaskerError::Configuration { .. }));
    }

    #[test]
    fn test_invalid_overrides_are_rejected() {
        for (name, value) in [
            ("MASKER_MIN_PART_SIZE", "1024"),
            ("MASKER_MIN_PART_SIZE", "lots"),
            ("MASKER_COMPRESSION_LEVEL", "10"),
            ("MASKER_MAX_CONCURRENT_OBJECTS", "0"),
        ] {
            let mut vars = BUCKETS.to_vec();
            vars.push((name, value));
            let result = MaskerConfig::from_lookup(lookup(&vars));
            assert!(
                matches!(result, Err(MaskerError::Configuration { .. })),
                "{name}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_builder_allows_small_parts() {
        let config = MaskerConfig::new("raw", "masked")
            .with_min_part_size(16)
            .with_key_prefix("p/")
            .with_encryption(ServerSideEncryption::None);
        assert!(config.validate().is_ok());

        let options = config.sink_options();
        assert_eq!(options.min_part_size, 16);
        assert_eq!(options.encryption, ServerSideEncryption::None);
    }
}

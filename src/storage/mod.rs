//! Object store capability used by the masking pipeline.
//!
//! The pipeline only needs to stream a source object and to write output
//! objects through multipart uploads, so the store is reduced to those
//! operations. Calls are blocking; implementations backed by an async client
//! bridge onto a runtime handle.

pub mod memory;
pub mod multipart;
pub mod remote;

pub use memory::InMemoryStore;
pub use multipart::MultipartUpload;
pub use remote::RemoteStore;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use thiserror::Error;

/// Errors raised by object store implementations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object not found: {location}")]
    NotFound { location: ObjectLocation },

    #[error("Bucket is not configured: {bucket}")]
    UnknownBucket { bucket: String },

    #[error("No such multipart upload: {upload_id}")]
    NoSuchUpload { upload_id: String },

    #[error("Server-side encryption {requested} is not configured for bucket {bucket}")]
    EncryptionUnavailable {
        bucket: String,
        requested: ServerSideEncryption,
    },

    #[error("Request rejected by the store: {operation} {location}")]
    Rejected {
        operation: &'static str,
        location: ObjectLocation,
    },

    #[error("Object store request failed: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Bucket and key of one object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Server-side encryption requested for uploaded objects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerSideEncryption {
    None,
    #[default]
    Aes256,
}

impl fmt::Display for ServerSideEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Aes256 => f.write_str("AES256"),
        }
    }
}

/// In-progress multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadHandle {
    pub location: ObjectLocation,
    pub upload_id: String,
    pub encryption: ServerSideEncryption,
}

/// Integrity tag (ETag) the store returned for an uploaded part
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartTag(pub String);

/// A part to be listed when completing an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: u32,
    pub tag: PartTag,
}

/// Blocking object store operations needed by the pipeline
pub trait ObjectStore: Send + Sync {
    /// Open a streaming reader over an object's bytes
    fn get(&self, location: &ObjectLocation) -> StoreResult<Box<dyn Read + Send>>;

    fn initiate_multipart_upload(
        &self,
        location: &ObjectLocation,
        encryption: ServerSideEncryption,
    ) -> StoreResult<UploadHandle>;

    /// Upload one part; `part_number` starts at 1
    fn upload_part(
        &self,
        upload: &UploadHandle,
        part_number: u32,
        bytes: Vec<u8>,
    ) -> StoreResult<PartTag>;

    /// Combine the listed parts, in order, into the destination object
    fn complete_multipart_upload(
        &self,
        upload: &UploadHandle,
        parts: &[CompletedPart],
    ) -> StoreResult<()>;

    fn abort_multipart_upload(&self, upload: &UploadHandle) -> StoreResult<()>;

    fn delete(&self, location: &ObjectLocation) -> StoreResult<()>;
}

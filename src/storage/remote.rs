//! Object store backed by `object_store` clients.
//!
//! Each bucket is served by its own client implementing both `ObjectStore`
//! and `MultipartStore`. The async client calls are driven to completion on
//! a runtime handle, so these methods must be called from a blocking context
//! such as `tokio::task::spawn_blocking`, never from inside an async task.

use super::{
    CompletedPart, ObjectLocation, ObjectStore, PartTag, ServerSideEncryption, StoreError,
    StoreResult, UploadHandle,
};
use futures::TryStreamExt;
use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use object_store::multipart::{MultipartStore, PartId};
use object_store::path::Path;
use object_store::{ObjectStore as ObjectStoreClient, PutPayload};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::debug;

/// Client able to read objects and drive multipart uploads
pub trait BucketClient: ObjectStoreClient + MultipartStore {}

impl<T: ObjectStoreClient + MultipartStore> BucketClient for T {}

struct RegisteredBucket {
    client: Arc<dyn BucketClient>,
    encryption: ServerSideEncryption,
}

/// Object store dispatching to one `object_store` client per bucket
pub struct RemoteStore {
    buckets: HashMap<String, RegisteredBucket>,
    runtime: Handle,
}

impl RemoteStore {
    pub fn new(runtime: Handle) -> Self {
        Self {
            buckets: HashMap::new(),
            runtime,
        }
    }

    /// Serve `bucket` with `client`.
    ///
    /// `encryption` is the server-side encryption the client applies to the
    /// objects it writes.
    pub fn with_bucket(
        mut self,
        bucket: impl Into<String>,
        client: Arc<dyn BucketClient>,
        encryption: ServerSideEncryption,
    ) -> Self {
        self.buckets
            .insert(bucket.into(), RegisteredBucket { client, encryption });
        self
    }

    /// Build S3 clients from the standard `AWS_*` environment variables.
    ///
    /// Each `(bucket, encryption)` pair gets its own client; `Aes256` buckets
    /// write objects with SSE-S3.
    pub fn amazon_s3(
        runtime: Handle,
        buckets: &[(&str, ServerSideEncryption)],
    ) -> StoreResult<Self> {
        let mut store = Self::new(runtime);
        for &(bucket, encryption) in buckets {
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
            if encryption == ServerSideEncryption::Aes256 {
                let key: AmazonS3ConfigKey = "aws_server_side_encryption".parse()?;
                builder = builder.with_config(key, "AES256");
            }
            let client = Arc::new(builder.build()?);
            debug!("Configured S3 client for bucket {} ({})", bucket, encryption);
            store = store.with_bucket(bucket, client, encryption);
        }
        Ok(store)
    }

    fn bucket(&self, bucket: &str) -> StoreResult<&RegisteredBucket> {
        self.buckets
            .get(bucket)
            .ok_or_else(|| StoreError::UnknownBucket {
                bucket: bucket.to_string(),
            })
    }

    fn client(&self, bucket: &str) -> StoreResult<&Arc<dyn BucketClient>> {
        self.bucket(bucket).map(|registered| &registered.client)
    }
}

impl ObjectStore for RemoteStore {
    fn get(&self, location: &ObjectLocation) -> StoreResult<Box<dyn Read + Send>> {
        let client = self.client(&location.bucket)?;
        let path = Path::from(location.key.as_str());
        let result = match self.runtime.block_on(client.get(&path)) {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StoreError::NotFound {
                    location: location.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let stream = result.into_stream().map_err(std::io::Error::other);
        let reader = SyncIoBridge::new_with_handle(StreamReader::new(stream), self.runtime.clone());
        Ok(Box::new(reader))
    }

    fn initiate_multipart_upload(
        &self,
        location: &ObjectLocation,
        encryption: ServerSideEncryption,
    ) -> StoreResult<UploadHandle> {
        let registered = self.bucket(&location.bucket)?;
        if encryption != ServerSideEncryption::None && registered.encryption != encryption {
            return Err(StoreError::EncryptionUnavailable {
                bucket: location.bucket.clone(),
                requested: encryption,
            });
        }

        let path = Path::from(location.key.as_str());
        let upload_id = self
            .runtime
            .block_on(registered.client.create_multipart(&path))?;
        Ok(UploadHandle {
            location: location.clone(),
            upload_id,
            encryption,
        })
    }

    fn upload_part(
        &self,
        upload: &UploadHandle,
        part_number: u32,
        bytes: Vec<u8>,
    ) -> StoreResult<PartTag> {
        let client = self.client(&upload.location.bucket)?;
        let path = Path::from(upload.location.key.as_str());
        // object_store indexes parts from 0
        let part_idx = part_number.saturating_sub(1) as usize;
        let part = self.runtime.block_on(client.put_part(
            &path,
            &upload.upload_id,
            part_idx,
            PutPayload::from(bytes),
        ))?;
        Ok(PartTag(part.content_id))
    }

    fn complete_multipart_upload(
        &self,
        upload: &UploadHandle,
        parts: &[CompletedPart],
    ) -> StoreResult<()> {
        let client = self.client(&upload.location.bucket)?;
        let path = Path::from(upload.location.key.as_str());
        let part_ids = parts
            .iter()
            .map(|part| PartId {
                content_id: part.tag.0.clone(),
            })
            .collect();
        self.runtime
            .block_on(client.complete_multipart(&path, &upload.upload_id, part_ids))?;
        Ok(())
    }

    fn abort_multipart_upload(&self, upload: &UploadHandle) -> StoreResult<()> {
        let client = self.client(&upload.location.bucket)?;
        let path = Path::from(upload.location.key.as_str());
        self.runtime
            .block_on(client.abort_multipart(&path, &upload.upload_id))?;
        Ok(())
    }

    fn delete(&self, location: &ObjectLocation) -> StoreResult<()> {
        let client = self.client(&location.bucket)?;
        let path = Path::from(location.key.as_str());
        self.runtime.block_on(client.delete(&path))?;
        Ok(())
    }
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buckets: Vec<&String> = self.buckets.keys().collect();
        buckets.sort();
        write!(f, "RemoteStore<{buckets:?}>")
    }
}

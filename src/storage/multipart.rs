//! Buffered multipart upload exposed as a `std::io::Write`.
//!
//! Bytes accumulate in a part buffer and are sent as one part each time the
//! buffer reaches the minimum part size. The upload is finalized exactly
//! once, by [`MultipartUpload::close`] (complete) or
//! [`MultipartUpload::abort`]; dropping an unfinalized upload aborts it as a
//! last resort.

use super::{CompletedPart, ObjectLocation, ObjectStore, ServerSideEncryption, UploadHandle};
use crate::constants::MAX_PART_COUNT;
use crate::error::{MaskerError, Result};
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, warn};

/// Write-only destination bound to one remote object
pub struct MultipartUpload {
    store: Arc<dyn ObjectStore>,
    location: ObjectLocation,
    handle: Option<UploadHandle>,
    min_part_size: usize,
    part_buffer: Vec<u8>,
    completed_parts: Vec<CompletedPart>,
    /// First part whose upload failed; its bytes are gone
    lost_part: Option<u32>,
    discarding: AtomicBool,
}

impl MultipartUpload {
    /// Begin a multipart upload to `location`
    pub fn open(
        store: Arc<dyn ObjectStore>,
        location: ObjectLocation,
        encryption: ServerSideEncryption,
        min_part_size: usize,
    ) -> Result<Self> {
        let handle = store
            .initiate_multipart_upload(&location, encryption)
            .map_err(|e| MaskerError::upload(&location.key, "initiate", e))?;
        debug!(
            "Initiated multipart upload {} for {}",
            handle.upload_id, location
        );

        Ok(Self {
            store,
            location,
            handle: Some(handle),
            min_part_size: min_part_size.max(1),
            part_buffer: Vec::with_capacity(min_part_size),
            completed_parts: Vec::new(),
            lost_part: None,
            discarding: AtomicBool::new(false),
        })
    }

    pub fn location(&self) -> &ObjectLocation {
        &self.location
    }

    /// Whether neither `close` nor `abort` has run yet
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn parts_uploaded(&self) -> usize {
        self.completed_parts.len()
    }

    pub fn buffered_len(&self) -> usize {
        self.part_buffer.len()
    }

    /// Discard every byte written from now on.
    ///
    /// Lets the encoders layered on top be flushed and dropped ahead of an
    /// abort without sending any more parts.
    pub fn request_abort(&self) {
        self.discarding.store(true, Ordering::Release);
    }

    fn lost_part_error(&self, part_number: u32) -> MaskerError {
        MaskerError::IncompleteUpload {
            key: self.location.key.clone(),
            part_number,
        }
    }

    fn next_part_number(&self) -> u32 {
        // part numbers start at 1
        self.completed_parts.len() as u32 + 1
    }

    /// Send the buffered bytes as the next part and clear the buffer
    fn upload_part(&mut self) -> Result<()> {
        let Some(handle) = self.handle.as_ref() else {
            return Err(MaskerError::upload(
                &self.location.key,
                "upload part of",
                super::StoreError::NoSuchUpload {
                    upload_id: "<finalized>".to_string(),
                },
            ));
        };

        let part_number = self.next_part_number();
        if part_number > MAX_PART_COUNT {
            return Err(MaskerError::PartLimitExceeded {
                key: self.location.key.clone(),
                limit: MAX_PART_COUNT,
            });
        }

        debug!(
            "multipart upload {} [{}]: size={}",
            handle.upload_id,
            part_number,
            self.part_buffer.len()
        );
        let bytes = std::mem::take(&mut self.part_buffer);
        let size = bytes.len();
        match self.store.upload_part(handle, part_number, bytes) {
            Ok(tag) => {
                self.completed_parts.push(CompletedPart { part_number, tag });
                self.part_buffer.reserve(self.min_part_size);
                Ok(())
            }
            Err(e) => {
                self.lost_part.get_or_insert(part_number);
                warn!(
                    "Failed to upload part {} ({} bytes) of {}: {}",
                    part_number, size, self.location, e
                );
                Err(MaskerError::upload(&self.location.key, "upload part of", e))
            }
        }
    }

    /// Upload what remains and complete the upload with every part in order
    fn finish_parts(&mut self, handle: &UploadHandle) -> Result<()> {
        // a multipart upload needs at least one part, even an empty one
        if !self.part_buffer.is_empty() || self.completed_parts.is_empty() {
            self.upload_part()?;
        }
        self.store
            .complete_multipart_upload(handle, &self.completed_parts)
            .map_err(|e| MaskerError::upload(&self.location.key, "complete", e))
    }

    /// Flush the final part and complete the upload.
    ///
    /// If anything fails the upload is aborted before the error is returned,
    /// as it is when an earlier part failed to upload. Does nothing once the
    /// upload has been closed or aborted.
    pub fn close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.clone() else {
            return Ok(());
        };
        debug!("Closing multipart upload {} for {}", handle.upload_id, self.location);

        let result = match self.lost_part {
            Some(part_number) => Err(self.lost_part_error(part_number)),
            None => self.finish_parts(&handle),
        };
        self.handle = None;
        self.part_buffer = Vec::new();

        if let Err(e) = &result {
            warn!(
                "Aborting multipart upload of {} as close failed: {}",
                self.location, e
            );
            if let Err(abort_err) = self.store.abort_multipart_upload(&handle) {
                error!(
                    "Failed to abort multipart upload {} of {}: {}",
                    handle.upload_id, self.location, abort_err
                );
            }
        }
        result
    }

    /// Cancel the upload remotely.
    ///
    /// Safe to call repeatedly and after a failed write.
    pub fn abort(&mut self) -> Result<()> {
        self.request_abort();
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.part_buffer = Vec::new();
        debug!("Aborting multipart upload {} for {}", handle.upload_id, self.location);
        self.store
            .abort_multipart_upload(&handle)
            .map_err(|e| MaskerError::upload(&self.location.key, "abort", e))
    }
}

impl Write for MultipartUpload {
    /// Buffer `buf`, sending a part once the buffer is large enough.
    ///
    /// Always accepts the whole of `buf`.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.discarding.load(Ordering::Acquire) {
            return Ok(buf.len());
        }
        if self.handle.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("multipart upload of {} is already finalized", self.location),
            ));
        }
        if let Some(part_number) = self.lost_part {
            return Err(io::Error::other(self.lost_part_error(part_number)));
        }

        self.part_buffer.extend_from_slice(buf);
        if self.part_buffer.len() >= self.min_part_size {
            self.upload_part().map_err(io::Error::other)?;
        }
        Ok(buf.len())
    }

    /// Parts only leave at the size threshold or on close
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MultipartUpload {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!(
                "Multipart upload {} of {} dropped without close or abort; aborting",
                handle.upload_id, self.location
            );
            if let Err(e) = self.store.abort_multipart_upload(&handle) {
                error!(
                    "Failed to abort multipart upload {} of {}: {}",
                    handle.upload_id, self.location, e
                );
            }
        }
    }
}

impl std::fmt::Debug for MultipartUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartUpload")
            .field("location", &self.location)
            .field("open", &self.is_open())
            .field("parts_uploaded", &self.completed_parts.len())
            .field("buffered", &self.part_buffer.len())
            .finish()
    }
}

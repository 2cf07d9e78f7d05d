//! In-memory object store.
//!
//! Keeps visible objects and pending multipart uploads apart, so a
//! completed upload becomes visible while an aborted one leaves no trace.
//! Every call is journaled and individual operations can be made to fail,
//! which makes it the store of choice for exercising the pipeline without a
//! network.

use super::{
    CompletedPart, ObjectLocation, ObjectStore, PartTag, ServerSideEncryption, StoreError,
    StoreResult, UploadHandle,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// One call made against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Get(ObjectLocation),
    Initiate {
        location: ObjectLocation,
        encryption: ServerSideEncryption,
    },
    UploadPart {
        upload_id: String,
        part_number: u32,
        size: usize,
    },
    Complete {
        upload_id: String,
        part_numbers: Vec<u32>,
    },
    Abort {
        upload_id: String,
    },
    Delete(ObjectLocation),
}

#[derive(Debug)]
struct PendingUpload {
    location: ObjectLocation,
    encryption: ServerSideEncryption,
    parts: BTreeMap<u32, (PartTag, Vec<u8>)>,
}

/// A stored object and the encryption it was written with
#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    encryption: ServerSideEncryption,
}

#[derive(Debug, Default)]
struct Failures {
    /// Fail every part upload once this many have succeeded
    parts_after: Option<usize>,
    /// Fail the next upload of this part number only
    part_once: Option<u32>,
    complete_keys: HashSet<String>,
    complete_all: bool,
    abort: bool,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<ObjectLocation, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    next_upload_id: u64,
    parts_uploaded: usize,
    calls: Vec<StoreCall>,
    failures: Failures,
}

/// Object store held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object directly, as if uploaded by someone else
    pub fn put_object(&self, location: ObjectLocation, bytes: Vec<u8>) {
        self.state().objects.insert(
            location,
            StoredObject {
                bytes,
                encryption: ServerSideEncryption::None,
            },
        );
    }

    /// Bytes of a visible object
    pub fn object(&self, location: &ObjectLocation) -> Option<Vec<u8>> {
        self.state()
            .objects
            .get(location)
            .map(|object| object.bytes.clone())
    }

    pub fn object_encryption(&self, location: &ObjectLocation) -> Option<ServerSideEncryption> {
        self.state()
            .objects
            .get(location)
            .map(|object| object.encryption)
    }

    /// Sorted keys of the visible objects in `bucket`
    pub fn object_keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state()
            .objects
            .keys()
            .filter(|location| location.bucket == bucket)
            .map(|location| location.key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of multipart uploads neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, predicate: impl Fn(&StoreCall) -> bool) -> usize {
        self.state().calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn upload_part_calls(&self) -> usize {
        self.count_calls(|call| matches!(call, StoreCall::UploadPart { .. }))
    }

    pub fn complete_calls(&self) -> usize {
        self.count_calls(|call| matches!(call, StoreCall::Complete { .. }))
    }

    pub fn abort_calls(&self) -> usize {
        self.count_calls(|call| matches!(call, StoreCall::Abort { .. }))
    }

    /// Make part uploads fail once `count` parts have been accepted
    pub fn fail_parts_after(&self, count: usize) {
        self.state().failures.parts_after = Some(count);
    }

    /// Make the next upload of part `part_number` fail, and later ones succeed
    pub fn fail_part_once(&self, part_number: u32) {
        self.state().failures.part_once = Some(part_number);
    }

    /// Make completion fail for uploads to `key`
    pub fn fail_complete_for(&self, key: impl Into<String>) {
        self.state().failures.complete_keys.insert(key.into());
    }

    pub fn fail_complete(&self) {
        self.state().failures.complete_all = true;
    }

    pub fn fail_abort(&self) {
        self.state().failures.abort = true;
    }
}

impl ObjectStore for InMemoryStore {
    fn get(&self, location: &ObjectLocation) -> StoreResult<Box<dyn Read + Send>> {
        let mut state = self.state();
        state.calls.push(StoreCall::Get(location.clone()));
        match state.objects.get(location) {
            Some(object) => Ok(Box::new(Cursor::new(object.bytes.clone()))),
            None => Err(StoreError::NotFound {
                location: location.clone(),
            }),
        }
    }

    fn initiate_multipart_upload(
        &self,
        location: &ObjectLocation,
        encryption: ServerSideEncryption,
    ) -> StoreResult<UploadHandle> {
        let mut state = self.state();
        state.calls.push(StoreCall::Initiate {
            location: location.clone(),
            encryption,
        });
        state.next_upload_id += 1;
        let upload_id = format!("upload-{}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                location: location.clone(),
                encryption,
                parts: BTreeMap::new(),
            },
        );
        debug!("Initiated in-memory upload {} for {}", upload_id, location);
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
        let mut state = self.state();
        state.calls.push(StoreCall::UploadPart {
            upload_id: upload.upload_id.clone(),
            part_number,
            size: bytes.len(),
        });

        let fail_once = state.failures.part_once == Some(part_number);
        if fail_once {
            state.failures.part_once = None;
        }
        let limit_reached = state
            .failures
            .parts_after
            .is_some_and(|limit| state.parts_uploaded >= limit);
        if fail_once || limit_reached {
            return Err(StoreError::Rejected {
                operation: "upload part",
                location: upload.location.clone(),
            });
        }

        let tag = PartTag(format!(
            "\"{}-{}-{}\"",
            upload.upload_id,
            part_number,
            bytes.len()
        ));
        let pending = state
            .uploads
            .get_mut(&upload.upload_id)
            .ok_or_else(|| StoreError::NoSuchUpload {
                upload_id: upload.upload_id.clone(),
            })?;
        pending.parts.insert(part_number, (tag.clone(), bytes));
        state.parts_uploaded += 1;
        Ok(tag)
    }

    fn complete_multipart_upload(
        &self,
        upload: &UploadHandle,
        parts: &[CompletedPart],
    ) -> StoreResult<()> {
        let mut state = self.state();
        state.calls.push(StoreCall::Complete {
            upload_id: upload.upload_id.clone(),
            part_numbers: parts.iter().map(|part| part.part_number).collect(),
        });

        let rejected = || StoreError::Rejected {
            operation: "complete multipart upload",
            location: upload.location.clone(),
        };
        if state.failures.complete_all
            || state.failures.complete_keys.contains(&upload.location.key)
            || parts.is_empty()
        {
            return Err(rejected());
        }

        let pending = state
            .uploads
            .get(&upload.upload_id)
            .ok_or_else(|| StoreError::NoSuchUpload {
                upload_id: upload.upload_id.clone(),
            })?;
        let mut bytes = Vec::new();
        for part in parts {
            match pending.parts.get(&part.part_number) {
                Some((tag, data)) if *tag == part.tag => bytes.extend_from_slice(data),
                _ => return Err(rejected()),
            }
        }

        let location = pending.location.clone();
        let encryption = pending.encryption;
        state.uploads.remove(&upload.upload_id);
        state
            .objects
            .insert(location, StoredObject { bytes, encryption });
        Ok(())
    }

    fn abort_multipart_upload(&self, upload: &UploadHandle) -> StoreResult<()> {
        let mut state = self.state();
        state.calls.push(StoreCall::Abort {
            upload_id: upload.upload_id.clone(),
        });
        if state.failures.abort {
            return Err(StoreError::Rejected {
                operation: "abort multipart upload",
                location: upload.location.clone(),
            });
        }
        state
            .uploads
            .remove(&upload.upload_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NoSuchUpload {
                upload_id: upload.upload_id.clone(),
            })
    }

    fn delete(&self, location: &ObjectLocation) -> StoreResult<()> {
        let mut state = self.state();
        state.calls.push(StoreCall::Delete(location.clone()));
        state.objects.remove(location);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> ObjectLocation {
        ObjectLocation::new("masked", "2024/01/01/log.gz")
    }

    #[test]
    fn test_completed_upload_becomes_visible() {
        let store = InMemoryStore::new();
        let upload = store
            .initiate_multipart_upload(&location(), ServerSideEncryption::Aes256)
            .unwrap();
        let first = store.upload_part(&upload, 1, b"hello ".to_vec()).unwrap();
        let second = store.upload_part(&upload, 2, b"world".to_vec()).unwrap();
        assert!(store.object(&location()).is_none());

        store
            .complete_multipart_upload(
                &upload,
                &[
                    CompletedPart {
                        part_number: 1,
                        tag: first,
                    },
                    CompletedPart {
                        part_number: 2,
                        tag: second,
                    },
                ],
            )
            .unwrap();

        assert_eq!(store.object(&location()).unwrap(), b"hello world");
        assert_eq!(
            store.object_encryption(&location()),
            Some(ServerSideEncryption::Aes256)
        );
        assert_eq!(store.pending_uploads(), 0);
    }

    #[test]
    fn test_aborted_upload_leaves_nothing() {
        let store = InMemoryStore::new();
        let upload = store
            .initiate_multipart_upload(&location(), ServerSideEncryption::Aes256)
            .unwrap();
        store.upload_part(&upload, 1, b"data".to_vec()).unwrap();
        store.abort_multipart_upload(&upload).unwrap();

        assert!(store.object(&location()).is_none());
        assert_eq!(store.pending_uploads(), 0);
        assert!(matches!(
            store.abort_multipart_upload(&upload),
            Err(StoreError::NoSuchUpload { .. })
        ));
    }

    #[test]
    fn test_complete_rejects_mismatched_tag() {
        let store = InMemoryStore::new();
        let upload = store
            .initiate_multipart_upload(&location(), ServerSideEncryption::None)
            .unwrap();
        store.upload_part(&upload, 1, b"data".to_vec()).unwrap();

        let result = store.complete_multipart_upload(
            &upload,
            &[CompletedPart {
                part_number: 1,
                tag: PartTag("\"bogus\"".to_string()),
            }],
        );
        assert!(matches!(result, Err(StoreError::Rejected { .. })));
        assert_eq!(store.pending_uploads(), 1);
    }

    #[test]
    fn test_get_missing_object() {
        let store = InMemoryStore::new();
        let result = store.get(&ObjectLocation::new("logs", "gone.gz"));
        assert!(result.is_err_and(|e| e.is_not_found()));
    }

    #[test]
    fn test_fail_parts_after() {
        let store = InMemoryStore::new();
        store.fail_parts_after(1);
        let upload = store
            .initiate_multipart_upload(&location(), ServerSideEncryption::None)
            .unwrap();
        assert!(store.upload_part(&upload, 1, vec![1]).is_ok());
        assert!(store.upload_part(&upload, 2, vec![2]).is_err());
        assert_eq!(store.upload_part_calls(), 2);
    }
}

//! Queue envelopes carrying S3 object-created notifications.
//!
//! An envelope is an SQS batch whose record bodies are S3 event
//! notifications serialized as JSON. Malformed or unexpected entries are
//! logged and skipped so one bad message cannot hold back the batch.

use crate::error::{MaskerError, Result};
use serde::Deserialize;
use tracing::{debug, error, warn};

const OBJECT_CREATED_PREFIX: &str = "ObjectCreated:";

#[derive(Debug, Deserialize)]
struct QueueBatch {
    #[serde(rename = "Records")]
    records: Vec<QueueRecord>,
}

#[derive(Debug, Deserialize)]
struct QueueRecord {
    #[serde(rename = "messageId")]
    message_id: Option<String>,
    body: Option<String>,
}

/// Body of a queue record; test events carry no `Records`
#[derive(Debug, Deserialize)]
struct S3Notification {
    #[serde(rename = "Records")]
    records: Option<Vec<S3EventRecord>>,
}

#[derive(Debug, Deserialize)]
struct S3EventRecord {
    #[serde(rename = "eventName")]
    event_name: Option<String>,
    s3: Option<S3Entity>,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: Option<NamedBucket>,
    object: Option<KeyedObject>,
}

#[derive(Debug, Deserialize)]
struct NamedBucket {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeyedObject {
    key: Option<String>,
}

/// Keys of the objects created in `expected_bucket`, in notification order.
///
/// Fails only if `envelope` is not an SQS batch at all.
pub fn object_keys(envelope: &str, expected_bucket: &str) -> Result<Vec<String>> {
    let batch: QueueBatch = serde_json::from_str(envelope)
        .map_err(|e| MaskerError::notification(format!("not an SQS batch: {e}")))?;

    let mut keys = Vec::new();
    for record in batch.records {
        let message_id = record.message_id.as_deref().unwrap_or("?");
        let Some(body) = record.body.as_deref() else {
            error!("SQS record {} has no body", message_id);
            continue;
        };
        let notification: S3Notification = match serde_json::from_str(body) {
            Ok(notification) => notification,
            Err(e) => {
                error!("Invalid SQS record {}: {}", message_id, e);
                continue;
            }
        };
        let Some(entries) = notification.records else {
            debug!("Skipping SQS record {} without Records (test event?)", message_id);
            continue;
        };

        for entry in entries {
            if let Some(key) = created_key(entry, expected_bucket) {
                keys.push(key);
            }
        }
    }
    Ok(keys)
}

fn created_key(entry: S3EventRecord, expected_bucket: &str) -> Option<String> {
    let event_name = entry.event_name.as_deref().unwrap_or("?");
    if !event_name.starts_with(OBJECT_CREATED_PREFIX) {
        error!(
            "Event \"{}\" other than S3 object creation was notified; check the event source configuration",
            event_name
        );
        return None;
    }
    let Some(s3) = entry.s3 else {
        error!("Invalid S3 event: no s3 entity in {}", event_name);
        return None;
    };

    let Some(bucket) = s3.bucket.and_then(|bucket| bucket.name) else {
        error!("No bucket name in S3 object event");
        return None;
    };
    if bucket != expected_bucket {
        warn!(
            "Bucket name must be \"{}\" but \"{}\" was given; check the event source configuration",
            expected_bucket, bucket
        );
        return None;
    }
    let key = s3.object.and_then(|object| object.key);
    if key.is_none() {
        error!("No object key in S3 object event for bucket {}", bucket);
    }
    key
}

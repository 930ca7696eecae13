//! Store-mutation notifications.
//!
//! Internally every mutation is a [`StoreEvent`]. Externally delivered
//! notifications arrive as S3-style `Records` envelopes, optionally wrapped
//! in an SQS message whose body is an SNS notification; [`decode_notification`]
//! unwraps both shapes and rejects records that do not match the schema.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Removed,
}

/// A single object creation or removal in some bucket.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoreEvent {
    pub kind: EventKind,
    pub bucket: String,
    pub key: String,
    /// Size of the object that was written or removed, when known.
    pub size: Option<i64>,
}

impl StoreEvent {
    pub fn created(bucket: impl Into<String>, key: impl Into<String>, size: i64) -> Self {
        Self {
            kind: EventKind::Created,
            bucket: bucket.into(),
            key: key.into(),
            size: Some(size),
        }
    }

    pub fn removed(bucket: impl Into<String>, key: impl Into<String>, size: Option<i64>) -> Self {
        Self {
            kind: EventKind::Removed,
            bucket: bucket.into(),
            key: key.into(),
            size,
        }
    }

    /// Signed byte change this event contributes: `+size` on create,
    /// `-size` on remove, zero when the size is unknown.
    pub fn size_delta(&self) -> i64 {
        let size = self.size.unwrap_or(0);
        match self.kind {
            EventKind::Created => size,
            EventKind::Removed => -size,
        }
    }
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("notification is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Result of decoding one notification payload.
#[derive(Debug, Default, PartialEq)]
pub struct DecodedBatch {
    /// Events in delivery order.
    pub events: Vec<StoreEvent>,
    /// Records that were dropped because they did not match any known shape.
    pub skipped: usize,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Records", default)]
    records: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct QueueRecord {
    body: String,
}

#[derive(Deserialize)]
struct TopicMessage {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Deserialize)]
struct S3Record {
    #[serde(rename = "eventName")]
    event_name: String,
    s3: S3Entity,
}

#[derive(Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Deserialize)]
struct S3Object {
    key: String,
    size: Option<i64>,
}

/// Decode a notification payload into store events.
///
/// Only a payload that is not JSON at all is an error. Individual records
/// that fail to decode are logged and counted in [`DecodedBatch::skipped`].
pub fn decode_notification(payload: &[u8]) -> Result<DecodedBatch, EventError> {
    let envelope: Envelope = serde_json::from_slice(payload)?;
    let mut batch = DecodedBatch::default();
    decode_records(envelope.records, &mut batch);
    Ok(batch)
}

fn decode_records(records: Vec<serde_json::Value>, batch: &mut DecodedBatch) {
    for record in records {
        if record.get("body").is_some() {
            match unwrap_queue_record(record) {
                Ok(inner) => decode_records(inner.records, batch),
                Err(err) => {
                    warn!(error = %err, "skipping undecodable queue record");
                    batch.skipped += 1;
                }
            }
            continue;
        }

        match serde_json::from_value::<S3Record>(record) {
            Ok(s3) => match classify(&s3.event_name) {
                Some(kind) => batch.events.push(StoreEvent {
                    kind,
                    bucket: s3.s3.bucket.name,
                    key: s3.s3.object.key,
                    size: s3.s3.object.size,
                }),
                None => {
                    warn!(event_name = %s3.event_name, "skipping unsupported event type");
                    batch.skipped += 1;
                }
            },
            Err(err) => {
                warn!(error = %err, "skipping malformed notification record");
                batch.skipped += 1;
            }
        }
    }
}

fn unwrap_queue_record(record: serde_json::Value) -> Result<Envelope, serde_json::Error> {
    let queued: QueueRecord = serde_json::from_value(record)?;
    let topic: TopicMessage = serde_json::from_str(&queued.body)?;
    serde_json::from_str(&topic.message)
}

fn classify(event_name: &str) -> Option<EventKind> {
    if event_name.starts_with("ObjectCreated") {
        Some(EventKind::Created)
    } else if event_name.starts_with("ObjectRemoved") {
        Some(EventKind::Removed)
    } else {
        None
    }
}

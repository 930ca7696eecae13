//! Relieves size pressure by deleting the largest object in a bucket.

use crate::{
    models::object::Object,
    services::{pipeline::PipelineResult, storage_service::ObjectStore},
};
use std::sync::Arc;
use tracing::{error, info};

pub struct Cleaner {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl Cleaner {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Delete the largest object. Never fails: an empty bucket or a store
    /// error is logged and yields `None`.
    pub async fn run(&self) -> Option<Object> {
        info!(bucket = %self.bucket, "cleaner triggered by size alarm");
        match self.delete_largest().await {
            Ok(Some(object)) => {
                info!(key = %object.key, size = object.size_bytes, "deleted largest object");
                Some(object)
            }
            Ok(None) => {
                info!(bucket = %self.bucket, "no objects in bucket");
                None
            }
            Err(e) => {
                error!(error = %e, bucket = %self.bucket, "cleaner failed");
                None
            }
        }
    }

    async fn delete_largest(&self) -> PipelineResult<Option<Object>> {
        let objects = self.store.list_objects(&self.bucket).await?;
        let Some(largest) = largest(objects) else {
            return Ok(None);
        };
        self.store.delete_object(&self.bucket, &largest.key).await?;
        Ok(Some(largest))
    }
}

/// The largest object; on ties the first one in listing order.
fn largest(objects: Vec<Object>) -> Option<Object> {
    objects
        .into_iter()
        .reduce(|best, candidate| {
            if candidate.size_bytes > best.size_bytes {
                candidate
            } else {
                best
            }
        })
}

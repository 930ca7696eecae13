//! Records the aggregate size of tracked buckets after every mutation.

use crate::{
    models::{event::StoreEvent, size_sample::SizeSample},
    services::{pipeline::PipelineResult, size_history::SizeHistory, storage_service::ObjectStore},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

pub struct SizeTracker {
    store: Arc<dyn ObjectStore>,
    history: Arc<dyn SizeHistory>,
    buckets: Vec<String>,
}

impl SizeTracker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        history: Arc<dyn SizeHistory>,
        buckets: Vec<String>,
    ) -> Self {
        Self {
            store,
            history,
            buckets,
        }
    }

    pub fn tracks(&self, bucket: &str) -> bool {
        self.buckets.iter().any(|b| b == bucket)
    }

    /// Append a sample for the event's bucket if it is tracked.
    pub async fn handle(&self, event: &StoreEvent) -> PipelineResult<Option<SizeSample>> {
        if !self.tracks(&event.bucket) {
            return Ok(None);
        }
        self.record_at(&event.bucket, Utc::now().timestamp())
            .await
            .map(Some)
    }

    /// List `bucket`, sum its sizes and append one sample stamped `now`.
    pub async fn record_at(&self, bucket: &str, now: i64) -> PipelineResult<SizeSample> {
        let objects = self.store.list_objects(bucket).await?;
        let sample = SizeSample {
            bucket_name: bucket.to_string(),
            timestamp: now,
            total_size: objects.iter().map(|o| o.size_bytes).sum(),
            object_count: objects.len() as i64,
        };
        self.history.append(&sample).await?;

        info!(
            bucket,
            total_size = sample.total_size,
            object_count = sample.object_count,
            "recorded bucket size"
        );
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::TestEnv;
    use bytes::Bytes;

    #[tokio::test]
    async fn sample_sums_current_listing() {
        let env = TestEnv::new().await;
        env.storage
            .put_object("tracked", "assignment1.txt", None, Bytes::from_static(b"Empty Assignment 1\n"))
            .await
            .unwrap();
        env.storage
            .put_object("tracked", "assignment3.txt", None, Bytes::from_static(b"33"))
            .await
            .unwrap();

        let tracker = env.size_tracker();
        let sample = tracker.record_at("tracked", 500).await.unwrap();
        assert_eq!(sample.total_size, 21);
        assert_eq!(sample.object_count, 2);

        let rows = env.history.samples_since("tracked", 0).await.unwrap();
        assert_eq!(rows, vec![sample]);
    }

    #[tokio::test]
    async fn empty_bucket_records_a_zero_sample() {
        let env = TestEnv::new().await;
        let sample = env.size_tracker().record_at("tracked", 1).await.unwrap();
        assert_eq!((sample.total_size, sample.object_count), (0, 0));
    }

    #[tokio::test]
    async fn each_event_appends_one_sample() {
        let env = TestEnv::new().await;
        let tracker = env.size_tracker();

        let recorded = tracker
            .handle(&StoreEvent::created("tracked", "k", 0))
            .await
            .unwrap();
        assert!(recorded.is_some());

        let ignored = tracker
            .handle(&StoreEvent::created("source", "k", 0))
            .await
            .unwrap();
        assert!(ignored.is_none());
        assert_eq!(env.history.samples_since("tracked", 0).await.unwrap().len(), 1);
    }
}

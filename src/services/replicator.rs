//! Replicates source objects into the copy bucket and keeps the ledger's
//! retained-copy history bounded.

use crate::{
    models::{
        copy::{CopyRecord, copy_key},
        event::{EventKind, StoreEvent},
    },
    services::{
        ledger::CopyLedger,
        pipeline::PipelineResult,
        storage_service::{MAX_OBJECT_KEY_LEN, ObjectStore},
    },
};
use chrono::Utc;
use std::{collections::VecDeque, sync::Arc};
use tracing::{debug, info, warn};

pub struct Replicator {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<dyn CopyLedger>,
    source_bucket: String,
    copy_bucket: String,
    max_copies: usize,
}

impl Replicator {
    /// `max_copies` is the cap on retained copies per source object; it is
    /// clamped to at least one.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Arc<dyn CopyLedger>,
        source_bucket: impl Into<String>,
        copy_bucket: impl Into<String>,
        max_copies: usize,
    ) -> Self {
        Self {
            store,
            ledger,
            source_bucket: source_bucket.into(),
            copy_bucket: copy_bucket.into(),
            max_copies: max_copies.max(1),
        }
    }

    pub async fn handle(&self, event: &StoreEvent) -> PipelineResult<()> {
        self.handle_at(event, Utc::now().timestamp()).await
    }

    /// Apply one notification as of unix second `now`. Events for buckets
    /// other than the source bucket are ignored.
    pub async fn handle_at(&self, event: &StoreEvent, now: i64) -> PipelineResult<()> {
        if event.bucket != self.source_bucket {
            debug!(bucket = %event.bucket, key = %event.key, "ignoring event outside source bucket");
            return Ok(());
        }

        match event.kind {
            EventKind::Created => {
                let copy_len = copy_key(&event.key, now).len();
                if copy_len > MAX_OBJECT_KEY_LEN {
                    warn!(
                        key = %event.key,
                        copy_len,
                        limit = MAX_OBJECT_KEY_LEN,
                        "source key too long for a timestamped copy, skipping"
                    );
                    return Ok(());
                }
                self.replicate(&event.key, now).await?;
            }
            EventKind::Removed => {
                self.disown_all(&event.key, now).await?;
            }
        }
        Ok(())
    }

    /// Copy `key` under a fresh timestamped name, evicting the oldest
    /// retained copies until the new one fits under the cap.
    pub async fn replicate(&self, key: &str, now: i64) -> PipelineResult<CopyRecord> {
        let record = CopyRecord::retained(key, now);
        self.store
            .copy_object(
                &self.source_bucket,
                key,
                &self.copy_bucket,
                &record.copy_object_name,
            )
            .await?;

        // A row stamped `now` is about to be overwritten by `record`, so it
        // must not be evicted (its bytes are the copy just written).
        let mut retained: VecDeque<CopyRecord> = self
            .ledger
            .copies_of(key)
            .await?
            .into_iter()
            .filter(|copy| !copy.is_disowned && copy.copy_timestamp != now)
            .collect();

        while retained.len() >= self.max_copies {
            let Some(oldest) = retained.pop_front() else {
                break;
            };
            self.store
                .delete_object(&self.copy_bucket, &oldest.copy_object_name)
                .await?;
            self.ledger.remove(key, oldest.copy_timestamp).await?;
            info!(
                original = key,
                evicted = %oldest.copy_object_name,
                "evicted oldest retained copy"
            );
        }

        self.ledger.put(&record).await?;
        info!(original = key, copy = %record.copy_object_name, "replicated object");
        Ok(record)
    }

    /// Mark every copy of `key` disowned as of `now`. Bytes stay in place
    /// until the sweeper's grace period has passed.
    pub async fn disown_all(&self, key: &str, now: i64) -> PipelineResult<usize> {
        let copies = self.ledger.copies_of(key).await?;
        for copy in &copies {
            self.ledger.disown(key, copy.copy_timestamp, now).await?;
        }
        info!(original = key, disowned = copies.len(), "disowned copies");
        Ok(copies.len())
    }
}

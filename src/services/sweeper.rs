//! Periodic removal of disowned copies whose grace period has elapsed.
//!
//! The `Sweeper` runs as a background task, querying the ledger's disowned
//! index and deleting both the copy bytes and the ledger row.

use crate::services::{
    ledger::CopyLedger, pipeline::PipelineResult, storage_service::ObjectStore,
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Sweeper {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<dyn CopyLedger>,
    copy_bucket: String,
    grace_period: Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Arc<dyn CopyLedger>,
        copy_bucket: impl Into<String>,
        grace_period: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            copy_bucket: copy_bucket.into(),
            grace_period,
            interval: Duration::from_secs(60),
        }
    }

    /// Set custom sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the sweeper as a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                match self.run_once().await {
                    Ok(count) if count > 0 => {
                        info!(deleted = count, "sweeper retired disowned copies");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "sweeper failed to retire disowned copies");
                    }
                }
            }
        })
    }

    pub async fn run_once(&self) -> PipelineResult<usize> {
        self.run_once_at(Utc::now().timestamp()).await
    }

    /// Delete every disowned copy with `now - delete_time >= grace_period`
    /// and return how many were retired. A copy that fails to delete keeps
    /// its ledger row and is retried on the next pass.
    pub async fn run_once_at(&self, now: i64) -> PipelineResult<usize> {
        let cutoff = now - self.grace_period.as_secs() as i64;
        let due = self.ledger.disowned_before(cutoff).await?;

        let mut retired = 0;
        for copy in &due {
            if let Err(e) = self
                .store
                .delete_object(&self.copy_bucket, &copy.copy_object_name)
                .await
            {
                warn!(error = %e, copy = %copy.copy_object_name, "failed to delete disowned copy");
                continue;
            }
            if let Err(e) = self
                .ledger
                .remove(&copy.original_name, copy.copy_timestamp)
                .await
            {
                warn!(error = %e, copy = %copy.copy_object_name, "failed to remove ledger row");
                continue;
            }
            retired += 1;
        }
        Ok(retired)
    }
}

//! Wires the pipeline's consumers to the store's event fan-out.
//!
//! Each consumer gets its own broadcast receiver and task:
//! - the replicator reacts to source-bucket events
//! - the size tracker samples tracked buckets
//! - the size alarm folds deltas from the tracked bucket and runs the
//!   cleaner when it fires; it is also re-evaluated on a timer so it can
//!   clear without new events

use crate::{
    models::event::StoreEvent,
    services::{
        alarm::{AlarmTransition, SizeAlarm},
        cleaner::Cleaner,
        events::EventBus,
        ledger::LedgerError,
        replicator::Replicator,
        size_history::HistoryError,
        size_tracker::SizeTracker,
        storage_service::StorageError,
    },
};
use chrono::Utc;
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    sync::broadcast::{Receiver, error::RecvError},
    task::JoinHandle,
};
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error("plot rendering failed: {0}")]
    Render(#[from] image::ImageError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

pub struct Pipeline {
    pub replicator: Arc<Replicator>,
    pub size_tracker: Arc<SizeTracker>,
    pub alarm: Arc<SizeAlarm>,
    pub cleaner: Arc<Cleaner>,
    /// Bucket whose deltas feed the alarm.
    pub alarm_bucket: String,
    pub alarm_period: Duration,
}

impl Pipeline {
    /// Subscribe every consumer to `bus` and spawn its task.
    pub fn spawn(self, bus: &EventBus) -> Vec<JoinHandle<()>> {
        let replicator = self.replicator;
        let size_tracker = self.size_tracker;

        vec![
            spawn_consumer("replicator", bus.subscribe(), move |event| {
                let replicator = replicator.clone();
                async move {
                    if let Err(e) = replicator.handle(&event).await {
                        error!(error = %e, key = %event.key, "replication failed");
                    }
                }
            }),
            spawn_consumer("size-tracker", bus.subscribe(), move |event| {
                let size_tracker = size_tracker.clone();
                async move {
                    if let Err(e) = size_tracker.handle(&event).await {
                        error!(error = %e, bucket = %event.bucket, "size tracking failed");
                    }
                }
            }),
            spawn_alarm(
                bus.subscribe(),
                self.alarm,
                self.cleaner,
                self.alarm_bucket,
                self.alarm_period,
            ),
        ]
    }
}

fn spawn_consumer<F, Fut>(name: &'static str, mut rx: Receiver<StoreEvent>, f: F) -> JoinHandle<()>
where
    F: Fn(StoreEvent) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => f(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(consumer = name, skipped, "consumer lagged behind store events");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!(consumer = name, "event consumer stopped");
    })
}

fn spawn_alarm(
    mut rx: Receiver<StoreEvent>,
    alarm: Arc<SizeAlarm>,
    cleaner: Arc<Cleaner>,
    bucket: String,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let transition = tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) if event.bucket == bucket => {
                        alarm.observe(&event, Utc::now().timestamp())
                    }
                    Ok(_) => None,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(consumer = "size-alarm", skipped, "consumer lagged behind store events");
                        None
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => alarm.evaluate(Utc::now().timestamp()),
            };

            match transition {
                Some(AlarmTransition::Triggered { sum }) => {
                    warn!(bucket = %bucket, sum, "size alarm triggered");
                    cleaner.run().await;
                }
                Some(AlarmTransition::Cleared { sum }) => {
                    info!(bucket = %bucket, sum, "size alarm cleared");
                }
                None => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        ledger::CopyLedger, size_history::SizeHistory, storage_service::ObjectStore,
        test_support::TestEnv,
    };
    use bytes::Bytes;

    async fn settle<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pipeline did not settle");
    }

    fn pipeline(env: &TestEnv) -> Pipeline {
        Pipeline {
            replicator: Arc::new(env.replicator(3)),
            size_tracker: Arc::new(env.size_tracker()),
            alarm: Arc::new(SizeAlarm::new(20, Duration::from_secs(10))),
            cleaner: Arc::new(Cleaner::new(env.storage.clone(), "tracked")),
            alarm_bucket: "tracked".into(),
            alarm_period: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn source_writes_are_replicated_through_the_bus() {
        let env = TestEnv::new().await;
        let handles = pipeline(&env).spawn(&env.events);

        env.storage
            .put_object("source", "a.txt", None, Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let ledger = env.ledger.clone();
        settle(|| {
            let ledger = ledger.clone();
            async move { ledger.copies_of("a.txt").await.unwrap().len() == 1 }
        })
        .await;

        handles.iter().for_each(JoinHandle::abort);
    }

    #[tokio::test]
    async fn alarm_cleans_the_largest_tracked_object() {
        let env = TestEnv::new().await;
        let handles = pipeline(&env).spawn(&env.events);

        for (key, body) in [
            ("assignment1.txt", &b"Empty Assignment 1\n"[..]),
            ("assignment2.txt", &b"Empty Assignment 22222222222\n"[..]),
        ] {
            env.storage
                .put_object("tracked", key, None, Bytes::copy_from_slice(body))
                .await
                .unwrap();
        }

        let storage = env.storage.clone();
        settle(|| {
            let storage = storage.clone();
            async move {
                let keys: Vec<_> = storage
                    .list_objects("tracked")
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|o| o.key)
                    .collect();
                keys == vec!["assignment1.txt"]
            }
        })
        .await;

        let history = env.history.clone();
        settle(|| {
            let history = history.clone();
            async move { !history.samples_since("tracked", 0).await.unwrap().is_empty() }
        })
        .await;

        handles.iter().for_each(JoinHandle::abort);
    }

    #[tokio::test]
    async fn stored_plot_survives_the_running_pipeline() {
        let env = TestEnv::new().await;
        let handles = pipeline(&env).spawn(&env.events);

        env.storage
            .put_object("tracked", "a.txt", None, Bytes::from_static(b"aa"))
            .await
            .unwrap();
        let history = env.history.clone();
        settle(|| {
            let history = history.clone();
            async move { !history.samples_since("tracked", 0).await.unwrap().is_empty() }
        })
        .await;

        let url = env.plot_service().plot().await.unwrap();
        assert_eq!(url.as_deref(), Some("http://localhost:3000/plots/plot.png"));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let plot = env
            .storage
            .get_object_metadata("plots", crate::services::plot_service::PLOT_OBJECT_NAME)
            .await
            .unwrap();
        assert!(plot.size_bytes > 0);
        let tracked: Vec<_> = env
            .storage
            .list_objects("tracked")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(tracked, vec!["a.txt"]);

        handles.iter().for_each(JoinHandle::abort);
    }
}

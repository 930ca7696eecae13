//! Queries recent size history, renders it and publishes the chart as an
//! object.

use crate::services::{
    pipeline::PipelineResult,
    plotting::{PLOT_WINDOW_SECS, render_size_plot},
    size_history::SizeHistory,
    storage_service::ObjectStore,
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

pub const PLOT_OBJECT_NAME: &str = "plot.png";

/// Backward window queried alongside the recent one so the line has
/// context before the visible span.
const HISTORY_WINDOW_SECS: i64 = 300;

#[derive(Clone)]
pub struct PlotService {
    history: Arc<dyn SizeHistory>,
    store: Arc<dyn ObjectStore>,
    tracked_bucket: String,
    plot_bucket: String,
    public_url: String,
}

impl PlotService {
    pub fn new(
        history: Arc<dyn SizeHistory>,
        store: Arc<dyn ObjectStore>,
        tracked_bucket: impl Into<String>,
        plot_bucket: impl Into<String>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            history,
            store,
            tracked_bucket: tracked_bucket.into(),
            plot_bucket: plot_bucket.into(),
            public_url: public_url.into(),
        }
    }

    pub async fn plot(&self) -> PipelineResult<Option<String>> {
        self.plot_at(Utc::now().timestamp()).await
    }

    /// Render and store the chart as of `now`. Returns the chart's URL, or
    /// `None` when the tracked bucket has no history to plot.
    pub async fn plot_at(&self, now: i64) -> PipelineResult<Option<String>> {
        let bucket = self.tracked_bucket.as_str();
        // Strictly newer than `now - PLOT_WINDOW_SECS`.
        let recent = self
            .history
            .samples_since(bucket, now - PLOT_WINDOW_SECS + 1)
            .await?;
        let backward = self
            .history
            .samples_since(bucket, now - HISTORY_WINDOW_SECS)
            .await?;
        let max_size = self.history.max_total_size(bucket).await?;

        let Some(png) = render_size_plot(&recent, &backward, max_size)? else {
            return Ok(None);
        };

        self.store
            .put_object(
                &self.plot_bucket,
                PLOT_OBJECT_NAME,
                Some("image/png".into()),
                Bytes::from(png),
            )
            .await?;

        let url = format!(
            "{}/{}/{}",
            self.public_url.trim_end_matches('/'),
            self.plot_bucket,
            PLOT_OBJECT_NAME
        );
        info!(%url, rows = backward.len(), max_size, "stored size plot");
        Ok(Some(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::size_sample::SizeSample;
    use crate::services::test_support::TestEnv;

    #[tokio::test]
    async fn no_history_means_no_plot() {
        let env = TestEnv::new().await;
        assert_eq!(env.plot_service().plot_at(1_000).await.unwrap(), None);
        assert!(env.storage.list_objects("plots").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stores_the_chart_and_returns_its_url() {
        let env = TestEnv::new().await;
        for (ts, size) in [(990, 19), (995, 47), (999, 21)] {
            env.history
                .append(&SizeSample {
                    bucket_name: "tracked".into(),
                    timestamp: ts,
                    total_size: size,
                    object_count: 1,
                })
                .await
                .unwrap();
        }

        let url = env.plot_service().plot_at(1_000).await.unwrap();
        assert_eq!(url.as_deref(), Some("http://localhost:3000/plots/plot.png"));

        let stored = env
            .storage
            .get_object_metadata("plots", PLOT_OBJECT_NAME)
            .await
            .unwrap();
        assert_eq!(stored.content_type.as_deref(), Some("image/png"));
        assert!(stored.size_bytes > 0);
    }

    #[tokio::test]
    async fn rows_older_than_the_history_window_are_ignored() {
        let env = TestEnv::new().await;
        env.history
            .append(&SizeSample {
                bucket_name: "tracked".into(),
                timestamp: 100,
                total_size: 5,
                object_count: 1,
            })
            .await
            .unwrap();

        assert_eq!(env.plot_service().plot_at(1_000).await.unwrap(), None);
    }
}

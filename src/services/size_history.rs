//! Time series of aggregate bucket sizes.

use crate::models::size_sample::SizeSample;
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("size history query failed: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

#[async_trait]
pub trait SizeHistory: Send + Sync {
    /// Append a sample. A second sample for the same bucket and second
    /// replaces the first.
    async fn append(&self, sample: &SizeSample) -> HistoryResult<()>;

    /// Samples for `bucket` with `timestamp >= since`, oldest first.
    async fn samples_since(&self, bucket: &str, since: i64) -> HistoryResult<Vec<SizeSample>>;

    /// Largest `total_size` ever recorded for `bucket`, or 0 without samples.
    async fn max_total_size(&self, bucket: &str) -> HistoryResult<i64>;
}

#[derive(FromRow)]
struct HistoryRow {
    bucket_name: String,
    timestamp: i64,
    total_size: i64,
    object_count: i64,
}

impl From<HistoryRow> for SizeSample {
    fn from(row: HistoryRow) -> Self {
        Self {
            bucket_name: row.bucket_name,
            timestamp: row.timestamp,
            total_size: row.total_size,
            object_count: row.object_count,
        }
    }
}

#[derive(Clone)]
pub struct SqliteSizeHistory {
    db: Arc<SqlitePool>,
}

impl SqliteSizeHistory {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SizeHistory for SqliteSizeHistory {
    async fn append(&self, sample: &SizeSample) -> HistoryResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO size_history (bucket_name, timestamp, total_size, object_count)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&sample.bucket_name)
        .bind(sample.timestamp)
        .bind(sample.total_size)
        .bind(sample.object_count)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn samples_since(&self, bucket: &str, since: i64) -> HistoryResult<Vec<SizeSample>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT bucket_name, timestamp, total_size, object_count
             FROM size_history WHERE bucket_name = ? AND timestamp >= ?
             ORDER BY timestamp ASC",
        )
        .bind(bucket)
        .bind(since)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(SizeSample::from).collect())
    }

    async fn max_total_size(&self, bucket: &str) -> HistoryResult<i64> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(total_size) FROM size_history WHERE bucket_name = ?")
                .bind(bucket)
                .fetch_one(&*self.db)
                .await?;
        Ok(max.unwrap_or(0))
    }
}

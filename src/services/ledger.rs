//! Copy ledger: which copies of each source object exist, and which of them
//! are waiting to be swept.

use crate::models::copy::CopyRecord;
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger query failed: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[async_trait]
pub trait CopyLedger: Send + Sync {
    /// All rows for `original`, oldest copy first.
    async fn copies_of(&self, original: &str) -> LedgerResult<Vec<CopyRecord>>;

    /// Insert a row, replacing any row with the same key.
    async fn put(&self, record: &CopyRecord) -> LedgerResult<()>;

    async fn remove(&self, original: &str, copy_timestamp: i64) -> LedgerResult<()>;

    /// Mark a row disowned as of `delete_time`.
    async fn disown(
        &self,
        original: &str,
        copy_timestamp: i64,
        delete_time: i64,
    ) -> LedgerResult<()>;

    /// Disowned rows with `delete_time <= cutoff`, oldest first.
    async fn disowned_before(&self, cutoff: i64) -> LedgerResult<Vec<CopyRecord>>;
}

#[derive(FromRow)]
struct LedgerRow {
    original_obj: String,
    copy_timestamp: i64,
    copy_obj: String,
    is_disowned: String,
    delete_time: Option<i64>,
}

impl From<LedgerRow> for CopyRecord {
    fn from(row: LedgerRow) -> Self {
        Self {
            original_name: row.original_obj,
            copy_timestamp: row.copy_timestamp,
            copy_object_name: row.copy_obj,
            is_disowned: row.is_disowned == "true",
            delete_time: row.delete_time,
        }
    }
}

/// The disowned flag is stored as the strings `"true"`/`"false"` so the
/// `(is_disowned, delete_time)` index can serve the sweep query directly.
fn flag(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

#[derive(Clone)]
pub struct SqliteCopyLedger {
    db: Arc<SqlitePool>,
}

impl SqliteCopyLedger {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CopyLedger for SqliteCopyLedger {
    async fn copies_of(&self, original: &str) -> LedgerResult<Vec<CopyRecord>> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            "SELECT original_obj, copy_timestamp, copy_obj, is_disowned, delete_time
             FROM copy_ledger WHERE original_obj = ? ORDER BY copy_timestamp ASC",
        )
        .bind(original)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(CopyRecord::from).collect())
    }

    async fn put(&self, record: &CopyRecord) -> LedgerResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO copy_ledger
                (original_obj, copy_timestamp, copy_obj, is_disowned, delete_time)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.original_name)
        .bind(record.copy_timestamp)
        .bind(&record.copy_object_name)
        .bind(flag(record.is_disowned))
        .bind(record.delete_time)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn remove(&self, original: &str, copy_timestamp: i64) -> LedgerResult<()> {
        sqlx::query("DELETE FROM copy_ledger WHERE original_obj = ? AND copy_timestamp = ?")
            .bind(original)
            .bind(copy_timestamp)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn disown(
        &self,
        original: &str,
        copy_timestamp: i64,
        delete_time: i64,
    ) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE copy_ledger SET is_disowned = ?, delete_time = ?
             WHERE original_obj = ? AND copy_timestamp = ?",
        )
        .bind(flag(true))
        .bind(delete_time)
        .bind(original)
        .bind(copy_timestamp)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn disowned_before(&self, cutoff: i64) -> LedgerResult<Vec<CopyRecord>> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            "SELECT original_obj, copy_timestamp, copy_obj, is_disowned, delete_time
             FROM copy_ledger
             WHERE is_disowned = ? AND delete_time <= ?
             ORDER BY delete_time ASC",
        )
        .bind(flag(true))
        .bind(cutoff)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(CopyRecord::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::memory_pool;

    #[tokio::test]
    async fn copies_come_back_oldest_first() {
        let ledger = SqliteCopyLedger::new(Arc::new(memory_pool().await));
        for ts in [30, 10, 20] {
            ledger.put(&CopyRecord::retained("a.txt", ts)).await.unwrap();
        }
        ledger.put(&CopyRecord::retained("b.txt", 5)).await.unwrap();

        let copies = ledger.copies_of("a.txt").await.unwrap();
        let stamps: Vec<_> = copies.iter().map(|c| c.copy_timestamp).collect();
        assert_eq!(stamps, vec![10, 20, 30]);
        assert_eq!(copies[0].copy_object_name, "a.txt_10");
        assert!(!copies[0].is_disowned);
    }

    #[tokio::test]
    async fn same_key_put_replaces_the_row() {
        let ledger = SqliteCopyLedger::new(Arc::new(memory_pool().await));
        ledger.put(&CopyRecord::retained("a", 10)).await.unwrap();
        ledger.disown("a", 10, 11).await.unwrap();
        ledger.put(&CopyRecord::retained("a", 10)).await.unwrap();

        let copies = ledger.copies_of("a").await.unwrap();
        assert_eq!(copies, vec![CopyRecord::retained("a", 10)]);
    }

    #[tokio::test]
    async fn disowned_index_filters_by_cutoff() {
        let ledger = SqliteCopyLedger::new(Arc::new(memory_pool().await));
        for ts in [1, 2, 3] {
            ledger.put(&CopyRecord::retained("a", ts)).await.unwrap();
        }
        ledger.disown("a", 1, 100).await.unwrap();
        ledger.disown("a", 2, 105).await.unwrap();

        let due = ledger.disowned_before(100).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].copy_timestamp, 1);
        assert_eq!(due[0].delete_time, Some(100));

        assert_eq!(ledger.disowned_before(200).await.unwrap().len(), 2);

        ledger.remove("a", 1).await.unwrap();
        assert_eq!(ledger.disowned_before(200).await.unwrap().len(), 1);
    }
}

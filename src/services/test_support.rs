//! Shared fixtures for service tests: an in-memory SQLite database with the
//! schema applied and a temporary payload directory.

use crate::services::{
    db::run_migrations,
    events::EventBus,
    ledger::SqliteCopyLedger,
    plot_service::PlotService,
    replicator::Replicator,
    size_history::SqliteSizeHistory,
    size_tracker::SizeTracker,
    storage_service::StorageService,
};
use crate::state::AppState;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::sync::Arc;
use tempfile::TempDir;

pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

pub struct TestEnv {
    pub events: EventBus,
    pub storage: Arc<StorageService>,
    pub ledger: Arc<SqliteCopyLedger>,
    pub history: Arc<SqliteSizeHistory>,
    _dir: TempDir,
}

impl TestEnv {
    /// Buckets `source`, `copies`, `tracked` and `plots` exist and are empty.
    pub async fn new() -> Self {
        let db = Arc::new(memory_pool().await);
        let dir = TempDir::new().unwrap();
        let events = EventBus::new();
        let storage = Arc::new(StorageService::new(db.clone(), dir.path(), events.clone()));
        for bucket in ["source", "copies", "tracked", "plots"] {
            storage.create_bucket(bucket).await.unwrap();
        }

        Self {
            events,
            storage,
            ledger: Arc::new(SqliteCopyLedger::new(db.clone())),
            history: Arc::new(SqliteSizeHistory::new(db)),
            _dir: dir,
        }
    }

    pub fn replicator(&self, max_copies: usize) -> Replicator {
        Replicator::new(
            self.storage.clone(),
            self.ledger.clone(),
            "source",
            "copies",
            max_copies,
        )
    }

    pub fn size_tracker(&self) -> SizeTracker {
        SizeTracker::new(
            self.storage.clone(),
            self.history.clone(),
            vec!["tracked".into()],
        )
    }

    pub fn plot_service(&self) -> PlotService {
        PlotService::new(
            self.history.clone(),
            self.storage.clone(),
            "tracked",
            "plots",
            "http://localhost:3000",
        )
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            storage: self.storage.clone(),
            plots: self.plot_service(),
            events: self.events.clone(),
        }
    }
}

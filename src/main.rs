use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    alarm::SizeAlarm,
    cleaner::Cleaner,
    db,
    events::EventBus,
    ledger::SqliteCopyLedger,
    pipeline::Pipeline,
    plot_service::PlotService,
    replicator::Replicator,
    size_history::SqliteSizeHistory,
    size_tracker::SizeTracker,
    storage_service::StorageService,
    sweeper::Sweeper,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting object-replicator with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let pool = db::connect(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;

    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }
    let db = Arc::new(pool);

    // --- Store and the buckets the pipeline relies on ---
    let events = EventBus::new();
    let storage = Arc::new(StorageService::new(
        db.clone(),
        cfg.storage_dir.clone(),
        events.clone(),
    ));
    for bucket in cfg.buckets() {
        storage.ensure_bucket(bucket).await?;
    }

    let ledger = Arc::new(SqliteCopyLedger::new(db.clone()));
    let history = Arc::new(SqliteSizeHistory::new(db.clone()));

    // --- Event consumers ---
    let pipeline = Pipeline {
        replicator: Arc::new(Replicator::new(
            storage.clone(),
            ledger.clone(),
            cfg.source_bucket.clone(),
            cfg.copy_bucket.clone(),
            cfg.max_copies,
        )),
        size_tracker: Arc::new(SizeTracker::new(
            storage.clone(),
            history.clone(),
            vec![cfg.tracked_bucket.clone()],
        )),
        alarm: Arc::new(SizeAlarm::new(cfg.alarm_threshold, cfg.alarm_period)),
        cleaner: Arc::new(Cleaner::new(storage.clone(), cfg.tracked_bucket.clone())),
        alarm_bucket: cfg.tracked_bucket.clone(),
        alarm_period: cfg.alarm_period,
    };
    let consumers = pipeline.spawn(&events);
    tracing::info!(consumers = consumers.len(), "event pipeline started");

    // --- Retirement sweeper ---
    Sweeper::new(
        storage.clone(),
        ledger,
        cfg.copy_bucket.clone(),
        cfg.grace_period,
    )
    .with_interval(cfg.sweep_interval)
    .spawn();

    // --- Build router ---
    let plots = PlotService::new(
        history,
        storage.clone(),
        cfg.tracked_bucket.clone(),
        cfg.plot_bucket.clone(),
        cfg.public_url.clone(),
    );
    let app: Router = routes::routes::routes().with_state(AppState {
        storage,
        plots,
        events,
    });

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

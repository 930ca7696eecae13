//! `POST /events`: accept externally delivered store notifications.
//!
//! The body is an S3-style `Records` envelope, or a queue batch whose
//! records wrap one. Decoded events are published on the same bus the
//! store itself publishes to.

use crate::{errors::AppError, models::event::decode_notification, state::AppState};
use axum::{Json, body::Bytes, extract::State};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub skipped: usize,
}

pub async fn ingest_events(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IngestResponse>, AppError> {
    let batch = decode_notification(&body).map_err(|e| AppError::bad_request(e.to_string()))?;
    let accepted = batch.events.len();

    for event in batch.events {
        state.events.publish(event);
    }

    info!(accepted, skipped = batch.skipped, "ingested store notifications");
    Ok(Json(IngestResponse {
        accepted,
        skipped: batch.skipped,
    }))
}

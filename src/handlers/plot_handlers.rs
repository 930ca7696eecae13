//! `GET /plot`: render recent bucket size history and return its URL.

use crate::{errors::AppError, state::AppState};
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct PlotResponse {
    pub plot_url: String,
}

pub async fn get_plot(State(state): State<AppState>) -> Result<Json<PlotResponse>, AppError> {
    match state.plots.plot().await? {
        Some(plot_url) => Ok(Json(PlotResponse { plot_url })),
        None => Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "No data available for plotting.",
        )),
    }
}

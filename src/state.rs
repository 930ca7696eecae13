//! Shared state handed to every HTTP handler.

use crate::services::{
    events::EventBus, plot_service::PlotService, storage_service::StorageService,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<StorageService>,
    pub plots: PlotService,
    pub events: EventBus,
}

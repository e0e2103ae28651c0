//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use gallery_core::config::GalleryConfig;
use gallery_storage::LocalStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GalleryConfig>,
    pub store: Arc<LocalStore>,
    /// Bearer token required on protected routes.
    pub api_token: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: GalleryConfig, store: Arc<LocalStore>, api_token: impl Into<String>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            api_token: api_token.into(),
            start_time: Instant::now(),
        }
    }
}

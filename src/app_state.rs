use std::sync::Arc;

use crate::db::CatalogStore;
use crate::services::{jobs::JobQueue, progress::ProgressHub, storage::AssetStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub catalog: Arc<dyn CatalogStore>,
    pub assets: Arc<dyn AssetStore>,
    /// Whether 500 responses carry the underlying error text.
    pub expose_internal_errors: bool,
}

impl AppState {
    pub fn new(
        queue: Arc<JobQueue>,
        catalog: Arc<dyn CatalogStore>,
        assets: Arc<dyn AssetStore>,
    ) -> Self {
        Self {
            queue,
            catalog,
            assets,
            expose_internal_errors: false,
        }
    }

    pub fn with_internal_errors(mut self, expose: bool) -> Self {
        self.expose_internal_errors = expose;
        self
    }

    pub fn progress(&self) -> &Arc<ProgressHub> {
        self.queue.progress()
    }
}

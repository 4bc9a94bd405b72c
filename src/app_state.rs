use std::sync::Arc;

use crate::db::JobStore;
use crate::services::{pipeline::Pipeline, queue::RunQueue, storage::ImageStorage};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub storage: Arc<ImageStorage>,
    pub queue: Arc<RunQueue>,
    pub pipeline: Pipeline,
}

impl AppState {
    pub fn new(queue: RunQueue, pipeline: Pipeline) -> Self {
        Self {
            store: pipeline.store.clone(),
            storage: pipeline.storage.clone(),
            queue: Arc::new(queue),
            pipeline,
        }
    }
}

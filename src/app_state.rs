use std::path::PathBuf;
use std::sync::Arc;

use crate::db::Store;
use crate::services::{batch::BatchAggregator, inventory::InventorySyncWorker, queue::JobQueue};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn JobQueue>,
    pub aggregator: Arc<BatchAggregator>,
    pub inventory: Arc<InventorySyncWorker>,
    pub upload_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn JobQueue>, upload_dir: PathBuf) -> Self {
        Self {
            aggregator: Arc::new(BatchAggregator::new(store.clone(), queue.clone())),
            inventory: Arc::new(InventorySyncWorker::new(store.clone())),
            store,
            queue,
            upload_dir: Arc::new(upload_dir),
        }
    }
}

pub mod ai_metrics;
pub mod batch;
pub mod classifier;
pub mod images;
pub mod inventory;
pub mod photo_worker;
pub mod queue;
pub mod vision;
pub mod worker_pool;

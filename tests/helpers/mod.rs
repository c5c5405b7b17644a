//! Test helpers: stub collaborators, an in-memory environment, and HTTP utilities
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use photo_inventory::app_state::AppState;
use photo_inventory::db::{MemoryStore, Store};
use photo_inventory::models::batch::{Batch, BatchProgress};
use photo_inventory::models::photo::{Asset, Photo, PhotoAnalysis};
use photo_inventory::models::project::Project;
use photo_inventory::routes;
use photo_inventory::services::ai_metrics::{AiCallRecord, AiMetricsSink};
use photo_inventory::services::batch::BatchAggregator;
use photo_inventory::services::images::{ImageError, ImageLoader};
use photo_inventory::services::inventory::InventorySyncWorker;
use photo_inventory::services::photo_worker::PhotoAnalysisWorker;
use photo_inventory::services::queue::{MemoryJobQueue, QueueName, QueueOptions, RetryPolicy};
use photo_inventory::services::vision::{AiSettings, AnalyzeRequest, VisionError, VisionProvider};
use photo_inventory::services::worker_pool::{WorkerPool, WorkerPoolConfig};

use crate::fixtures::{PhotoFixture, PNG_BYTES};

/// Vision provider with canned answers.
///
/// Queued failures are returned first, one per call. After that the analysis
/// registered for the request's room is returned, else the default.
#[derive(Default)]
pub struct StubVision {
    default: PhotoAnalysis,
    by_room: HashMap<String, PhotoAnalysis>,
    failures: Mutex<VecDeque<VisionError>>,
    detected_room: Option<String>,
    delay: Option<Duration>,
    analyze_calls: AtomicUsize,
    detect_calls: AtomicUsize,
}

impl StubVision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, analysis: PhotoAnalysis) -> Self {
        self.default = analysis;
        self
    }

    pub fn with_fixtures(mut self, fixtures: &[PhotoFixture]) -> Self {
        for fixture in fixtures {
            self.by_room
                .insert(fixture.room_type.to_string(), fixture.analysis());
        }
        self
    }

    pub fn failing_with(self, failures: Vec<VisionError>) -> Self {
        *self.failures.lock() = failures.into();
        self
    }

    /// Room detection answers with `room`; without it detection fails.
    pub fn detecting(mut self, room: &str) -> Self {
        self.detected_room = Some(room.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionProvider for StubVision {
    fn model(&self) -> &str {
        "stub-vision"
    }

    async fn detect_room(&self, _image: &[u8], timeout: Duration) -> Result<String, VisionError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        self.detected_room
            .clone()
            .ok_or(VisionError::Timeout(timeout.as_millis() as u64))
    }

    async fn analyze_photo(
        &self,
        _image: &[u8],
        request: &AnalyzeRequest<'_>,
    ) -> Result<PhotoAnalysis, VisionError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        if let Some(failure) = self.failures.lock().pop_front() {
            return Err(failure);
        }
        Ok(request
            .room_type
            .and_then(|room| self.by_room.get(room))
            .unwrap_or(&self.default)
            .clone())
    }
}

/// Serves PNG bytes for every photo except ones named `broken*`.
pub struct StubImages;

#[async_trait]
impl ImageLoader for StubImages {
    async fn load(&self, photo: &Photo) -> Result<Vec<u8>, ImageError> {
        if photo.filename.starts_with("broken") {
            return Err(ImageError::InvalidFormat);
        }
        Ok(PNG_BYTES.to_vec())
    }
}

pub fn ai_settings() -> AiSettings {
    AiSettings {
        provider: "stub".to_string(),
        model: "stub-vision".to_string(),
        timeout: Duration::from_secs(5),
        room_detect_timeout: Duration::from_secs(1),
        detect_rooms: true,
    }
}

pub fn asset(filename: &str, room_type: Option<&str>) -> Asset {
    Asset::from_upload(filename, filename, filename.as_bytes())
        .with_room_type(room_type.map(str::to_string))
}

pub fn fixture_asset(fixture: &PhotoFixture) -> Asset {
    asset(fixture.filename, Some(fixture.room_type))
}

/// Aggregator, workers and pools wired to in-memory backends.
pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub aggregator: Arc<BatchAggregator>,
    pub vision: Arc<StubVision>,
    pub photo_worker: Arc<PhotoAnalysisWorker>,
    pub inventory: Arc<InventorySyncWorker>,
    pub photo_pool: Arc<WorkerPool>,
    pub inventory_pool: Arc<WorkerPool>,
    pub project: Project,
}

impl TestEnv {
    /// Must be called inside a Tokio runtime.
    pub fn new(vision: StubVision) -> Self {
        Self::with_job_timeout(vision, Duration::from_secs(5))
    }

    pub fn with_job_timeout(vision: StubVision, job_timeout: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new(QueueOptions {
            retry: RetryPolicy::immediate(3),
            ..QueueOptions::default()
        }));
        let project = Project {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Test move".to_string(),
        };
        store.insert_project(project.clone());

        let aggregator = Arc::new(BatchAggregator::new(store.clone(), queue.clone()));
        let vision = Arc::new(vision);
        let (metrics, _writer) = AiMetricsSink::spawn(store.clone(), 256);

        let photo_worker = Arc::new(PhotoAnalysisWorker::new(
            store.clone(),
            vision.clone(),
            Arc::new(StubImages),
            aggregator.clone(),
            metrics,
            ai_settings(),
        )
        .with_job_timeout(job_timeout));
        let inventory = Arc::new(InventorySyncWorker::new(store.clone()));

        let pool_config = WorkerPoolConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
        };
        let photo_pool = Arc::new(WorkerPool::new(
            queue.clone(),
            QueueName::PhotoAnalyze,
            photo_worker.clone(),
            pool_config.clone(),
        ));
        let inventory_pool = Arc::new(WorkerPool::new(
            queue.clone(),
            QueueName::InventorySync,
            inventory.clone(),
            pool_config,
        ));

        Self {
            store,
            queue,
            aggregator,
            vision,
            photo_worker,
            inventory,
            photo_pool,
            inventory_pool,
            project,
        }
    }

    pub fn owner(&self) -> Uuid {
        self.project.user_id
    }

    /// Create a batch and enqueue its photos, as the upload route does.
    pub async fn submit(&self, assets: &[Asset]) -> (Batch, Vec<Photo>) {
        let (batch, photos) = self
            .aggregator
            .create_batch(self.project.id, self.owner(), assets)
            .await
            .unwrap();
        self.aggregator
            .enqueue_photos(&batch, &photos, self.owner())
            .await
            .unwrap();
        (batch, photos)
    }

    /// Run both pools one job at a time until both queues are empty.
    pub async fn drain(&self) {
        while self.photo_pool.process_one().await.unwrap().is_some() {}
        while self.inventory_pool.process_one().await.unwrap().is_some() {}
    }

    pub async fn batch(&self, batch_id: Uuid) -> Batch {
        self.store.get_batch(batch_id).await.unwrap().unwrap()
    }

    pub async fn photo(&self, photo_id: Uuid) -> Photo {
        self.store.get_photo(photo_id).await.unwrap().unwrap()
    }

    /// AI call records, once the background writer has persisted `expected` of them.
    pub async fn ai_calls(&self, expected: usize) -> Vec<AiCallRecord> {
        for _ in 0..100 {
            let calls = self.store.ai_calls();
            if calls.len() >= expected {
                return calls;
            }
            sleep(Duration::from_millis(10)).await;
        }
        self.store.ai_calls()
    }
}

// ---- HTTP helpers ----

impl TestEnv {
    /// Serve the API router on an ephemeral port over this environment's backends.
    ///
    /// Returns the base URL and the upload directory.
    pub async fn spawn_api(&self) -> (String, PathBuf) {
        let upload_dir = std::env::temp_dir().join(format!("photo-inventory-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&upload_dir).await.unwrap();

        let state = AppState::new(self.store.clone(), self.queue.clone(), upload_dir.clone());
        let app = routes::router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), upload_dir)
    }
}

/// Base URL of an externally running API server.
pub fn base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

pub async fn create_project(
    client: &reqwest::Client,
    base_url: &str,
    user_id: Uuid,
    name: &str,
) -> Result<Project, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/api/v1/projects", base_url))
        .header("x-user-id", user_id.to_string())
        .json(&serde_json::json!({ "name": name }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("Project creation failed with status {}: {}", status, response.text().await?).into());
    }
    Ok(response.json().await?)
}

pub async fn upload_batch(
    client: &reqwest::Client,
    base_url: &str,
    user_id: Uuid,
    project_id: Uuid,
    files: &[(&str, &[u8])],
    room_type: Option<&str>,
) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    let mut form = reqwest::multipart::Form::new();
    for (filename, bytes) in files {
        form = form.part(
            "photos",
            reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(filename.to_string()),
        );
    }
    if let Some(room) = room_type {
        form = form.text("room_type", room.to_string());
    }

    Ok(client
        .post(format!("{}/api/v1/projects/{}/batches", base_url, project_id))
        .header("x-user-id", user_id.to_string())
        .multipart(form)
        .send()
        .await?)
}

pub async fn get_progress(
    client: &reqwest::Client,
    base_url: &str,
    user_id: Uuid,
    batch_id: Uuid,
) -> Result<BatchProgress, Box<dyn std::error::Error>> {
    let response = client
        .get(format!("{}/api/v1/batches/{}", base_url, batch_id))
        .header("x-user-id", user_id.to_string())
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(format!("Progress check failed: {}", response.text().await?).into());
    }
    Ok(response.json().await?)
}

/// Poll a batch until it settles (with timeout)
pub async fn wait_for_batch(
    client: &reqwest::Client,
    base_url: &str,
    user_id: Uuid,
    batch_id: Uuid,
    timeout_secs: u64,
) -> Result<BatchProgress, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for _ in 0..max_attempts {
        let progress = get_progress(client, base_url, user_id, batch_id).await?;
        if progress.status.is_settled() {
            return Ok(progress);
        }
        sleep(Duration::from_millis(500)).await;
    }

    Err(format!("Batch did not settle within {} seconds", timeout_secs).into())
}

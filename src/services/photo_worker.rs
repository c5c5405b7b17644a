//! Handler for `photo-analyze` jobs.
//!
//! A photo moves PENDING -> PROCESSING -> DONE, or to ERROR once its failure
//! is terminal. A failure that will be retried leaves the photo PROCESSING so
//! the batch never looks drained while a retry is in backoff.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::Store;
use crate::models::job::{PhotoAnalyzeJob, PhotoJobOutcome};
use crate::models::photo::{Photo, PhotoAnalysis, PhotoStatus};
use crate::services::ai_metrics::{AiCallRecord, AiMetricsSink, AiOperation};
use crate::services::batch::BatchAggregator;
use crate::services::classifier::{classify, classify_error, ClassifiedError, ErrorCode};
use crate::services::images::ImageLoader;
use crate::services::queue::{Delivery, JobFailure};
use crate::services::vision::{AiSettings, AnalyzeRequest, VisionProvider};
use crate::services::worker_pool::JobHandler;

pub struct PhotoAnalysisWorker {
    store: Arc<dyn Store>,
    vision: Arc<dyn VisionProvider>,
    images: Arc<dyn ImageLoader>,
    aggregator: Arc<BatchAggregator>,
    metrics: AiMetricsSink,
    settings: AiSettings,
    job_timeout: Duration,
}

/// Upper bound on one attempt's image, room and analysis steps.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

impl PhotoAnalysisWorker {
    pub fn new(
        store: Arc<dyn Store>,
        vision: Arc<dyn VisionProvider>,
        images: Arc<dyn ImageLoader>,
        aggregator: Arc<BatchAggregator>,
        metrics: AiMetricsSink,
        settings: AiSettings,
    ) -> Self {
        Self {
            store,
            vision,
            images,
            aggregator,
            metrics,
            settings,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    /// Run one attempt of a photo job.
    ///
    /// `attempt` is 1-based; `final_attempt` means no retry follows a failure.
    /// Once the job's photo id has been looked up, every exit records the
    /// failure (if any) and settles the batch before returning.
    pub async fn process(
        &self,
        job: &PhotoAnalyzeJob,
        attempt: u32,
        final_attempt: bool,
    ) -> Result<PhotoJobOutcome, JobFailure> {
        let result = match self.store.get_photo(job.photo_id).await {
            Ok(Some(photo)) => self.run_attempt(&photo, job, attempt).await,
            Ok(None) => {
                return Err(JobFailure::fatal(
                    ErrorCode::BadInput,
                    format!("photo {} not found", job.photo_id),
                ))
            }
            Err(e) => Err(ClassifiedError::unclassified(&e)),
        };

        let outcome = match result {
            Ok(outcome) => Ok(outcome),
            Err(classified) => {
                let terminal = !classified.retryable || final_attempt;
                self.record_failure(job.photo_id, &classified, attempt, terminal).await;
                Err(JobFailure::from(classified))
            }
        };

        self.settle(job.batch_id).await;
        outcome
    }

    async fn run_attempt(
        &self,
        photo: &Photo,
        job: &PhotoAnalyzeJob,
        attempt: u32,
    ) -> Result<PhotoJobOutcome, ClassifiedError> {
        if photo.status == PhotoStatus::Done && !job.force {
            debug!(photo_id = %photo.id, "Photo already analyzed, skipping");
            return Ok(PhotoJobOutcome::Skipped { photo_id: photo.id });
        }

        let claimed = self
            .store
            .claim_photo(photo.id, job.force)
            .await
            .map_err(|e| ClassifiedError::unclassified(&e))?;
        if !claimed {
            debug!(photo_id = %photo.id, "Photo completed concurrently, skipping");
            return Ok(PhotoJobOutcome::Skipped { photo_id: photo.id });
        }

        info!(photo_id = %photo.id, batch_id = ?job.batch_id, attempt, "Analyzing photo");

        let analyzed = timeout(self.job_timeout, self.analyze(photo, job, attempt))
            .await
            .unwrap_or_else(|_| {
                warn!(photo_id = %photo.id, attempt, "Photo analysis exceeded job timeout");
                Err(classify(&format!(
                    "photo analysis timed out after {}s",
                    self.job_timeout.as_secs()
                )))
            });
        let (room_type, analysis) = analyzed?;
        self.record_success(photo, room_type, analysis).await
    }

    /// Steps between claim and persistence: image, room, analysis.
    async fn analyze(
        &self,
        photo: &Photo,
        job: &PhotoAnalyzeJob,
        attempt: u32,
    ) -> Result<(Option<String>, PhotoAnalysis), ClassifiedError> {
        let image = self.images.load(photo).await.map_err(|e| classify_error(&e))?;

        let mut room_type = job.room_type.clone().or_else(|| photo.room_type.clone());
        if room_type.is_none() && self.settings.detect_rooms {
            room_type = self.detect_room(photo, &image, attempt).await;
        }

        let request = AnalyzeRequest {
            provider: &self.settings.provider,
            room_type: room_type.as_deref(),
            user_id: job.user_id,
            timeout: self.settings.timeout,
        };

        let started = Instant::now();
        let result = self.vision.analyze_photo(&image, &request).await;
        match result {
            Ok(analysis) => {
                self.record_call(AiOperation::AnalyzePhoto, started, None, attempt, photo);
                Ok((room_type, analysis))
            }
            Err(e) => {
                let classified = classify_error(&e);
                self.record_call(
                    AiOperation::AnalyzePhoto,
                    started,
                    Some(classified.code),
                    attempt,
                    photo,
                );
                warn!(photo_id = %photo.id, error = %e, code = %classified.code, "Analysis call failed");
                Err(classified)
            }
        }
    }

    /// Best-effort room detection; failures only show up in metrics and logs.
    async fn detect_room(&self, photo: &Photo, image: &[u8], attempt: u32) -> Option<String> {
        let started = Instant::now();
        let result = self
            .vision
            .detect_room(image, self.settings.room_detect_timeout)
            .await;
        let error_type = result.as_ref().err().map(|e| classify_error(e).code);
        self.record_call(AiOperation::DetectRoom, started, error_type, attempt, photo);

        match result {
            Ok(room) => {
                debug!(photo_id = %photo.id, room_type = %room, "Room detected");
                Some(room)
            }
            Err(e) => {
                warn!(photo_id = %photo.id, error = %e, "Room detection failed, continuing without room");
                None
            }
        }
    }

    fn record_call(
        &self,
        operation: AiOperation,
        started: Instant,
        error_type: Option<ErrorCode>,
        attempt: u32,
        photo: &Photo,
    ) {
        self.metrics.record(AiCallRecord {
            provider: self.settings.provider.clone(),
            model: self.vision.model().to_string(),
            operation,
            latency_ms: started.elapsed().as_millis() as u64,
            success: error_type.is_none(),
            error_type,
            retries: attempt.saturating_sub(1),
            meta: serde_json::json!({
                "photoId": photo.id,
                "batchId": photo.batch_id,
            }),
        });
    }

    async fn record_success(
        &self,
        photo: &Photo,
        room_type: Option<String>,
        analysis: PhotoAnalysis,
    ) -> Result<PhotoJobOutcome, ClassifiedError> {
        self.store
            .complete_photo(photo.id, room_type.as_deref(), &analysis)
            .await
            .map_err(|e| ClassifiedError::unclassified(&e))?;

        info!(
            photo_id = %photo.id,
            room_type = ?room_type,
            items = analysis.items.len(),
            volume_m3 = analysis.totals.volume_m3,
            "Photo analyzed"
        );

        Ok(PhotoJobOutcome::Analyzed {
            photo_id: photo.id,
            room_type,
            items_count: analysis.items.len(),
            volume_m3: analysis.totals.volume_m3,
        })
    }

    async fn record_failure(&self, photo_id: Uuid, error: &ClassifiedError, attempt: u32, terminal: bool) {
        if terminal {
            error!(photo_id = %photo_id, attempt, code = %error.code, "Photo failed permanently");
        } else {
            warn!(photo_id = %photo_id, attempt, code = %error.code, "Photo failed, will retry");
        }
        if let Err(e) = self.store.fail_photo(photo_id, error, terminal).await {
            error!(photo_id = %photo_id, error = %e, "Failed to record photo failure");
        }
    }

    /// Batch bookkeeping never fails the photo job.
    async fn settle(&self, batch_id: Option<Uuid>) {
        let Some(batch_id) = batch_id else {
            return;
        };
        if let Err(e) = self.aggregator.on_photo_settled(batch_id).await {
            error!(batch_id = %batch_id, error = %e, "Failed to update batch after photo settled");
        }
    }
}

#[async_trait]
impl JobHandler for PhotoAnalysisWorker {
    async fn handle(&self, delivery: &Delivery) -> Result<serde_json::Value, JobFailure> {
        let job: PhotoAnalyzeJob = delivery
            .payload()
            .map_err(|e| JobFailure::fatal(ErrorCode::BadInput, format!("invalid job payload: {e}")))?;
        let outcome = self
            .process(&job, delivery.attempt, delivery.is_final_attempt())
            .await?;
        serde_json::to_value(outcome).map_err(|e| JobFailure::fatal(ErrorCode::Unknown, e.to_string()))
    }
}

//! Integration tests for batch orchestration over in-memory backends
//!
//! Every test wires the real aggregator, workers and pools to `MemoryStore`
//! and `MemoryJobQueue`; only the vision provider and image loader are stubbed.

mod fixtures;
mod helpers;

use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use fixtures::{measured_sofa, BEDROOM, FIXTURES, KITCHEN, LIVING_ROOM};
use helpers::{asset, fixture_asset, StubVision, TestEnv};
use photo_inventory::models::batch::BatchStatus;
use photo_inventory::models::job::{InventorySyncJob, PhotoAnalyzeJob, PhotoJobOutcome};
use photo_inventory::models::photo::{PhotoAnalysis, PhotoStatus};
use photo_inventory::services::ai_metrics::AiOperation;
use photo_inventory::services::batch::BatchError;
use photo_inventory::services::classifier::{classify, ErrorCode};
use photo_inventory::services::queue::{JobQueue, QueueName};
use photo_inventory::services::vision::VisionError;
use photo_inventory::services::worker_pool::Disposition;

fn status_error(status: u16, body: &str) -> VisionError {
    VisionError::Status {
        status,
        body: body.to_string(),
    }
}

fn analyze_job(env: &TestEnv, photo_id: Uuid, batch_id: Uuid, force: bool) -> PhotoAnalyzeJob {
    PhotoAnalyzeJob {
        photo_id,
        user_id: env.owner(),
        asset_id: None,
        room_type: None,
        batch_id: Some(batch_id),
        force,
    }
}

#[tokio::test]
async fn test_all_photos_succeed_completes_batch() {
    let env = TestEnv::new(StubVision::new().with_fixtures(FIXTURES));
    let assets = vec![
        fixture_asset(&LIVING_ROOM),
        fixture_asset(&BEDROOM),
        fixture_asset(&KITCHEN),
        asset("hallway.jpg", Some("hallway")),
    ];
    let (batch, _) = env.submit(&assets).await;

    env.drain().await;

    let update = env.aggregator.update_batch_counts(batch.id).await.unwrap();
    assert_eq!(update.counts.queued, 0);
    assert_eq!(update.counts.processing, 0);
    assert_eq!(update.counts.completed, 4);
    assert_eq!(update.counts.failed, 0);
    assert_eq!(update.batch.status, BatchStatus::Completed);
    assert!(update.is_complete);
}

#[tokio::test]
async fn test_mixed_outcomes_make_batch_partial() {
    let env = TestEnv::new(StubVision::new().with_fixtures(FIXTURES));
    let assets = vec![
        fixture_asset(&LIVING_ROOM),
        fixture_asset(&BEDROOM),
        asset("broken.jpg", Some("kitchen")),
    ];
    let (batch, photos) = env.submit(&assets).await;

    env.drain().await;

    let update = env.aggregator.update_batch_counts(batch.id).await.unwrap();
    assert_eq!(update.counts.completed, 2);
    assert_eq!(update.counts.failed, 1);
    assert_eq!(update.batch.status, BatchStatus::Partial);
    assert!(update.is_complete);

    let broken = env.photo(photos[2].id).await;
    assert_eq!(broken.status, PhotoStatus::Error);
    assert_eq!(broken.error_code, Some(ErrorCode::BadInput));
    assert!(broken.analysis.is_none());
}

#[tokio::test]
async fn test_all_photos_fail_makes_batch_failed() {
    let env = TestEnv::new(StubVision::new());
    let assets = vec![asset("broken-1.jpg", None), asset("broken-2.jpg", None)];
    let (batch, _) = env.submit(&assets).await;

    env.drain().await;

    let batch = env.batch(batch.id).await;
    assert_eq!(batch.status, BatchStatus::Failed);
    assert_eq!(batch.counts.failed, 2);
    // A failed batch still drained, so the inventory job ran once.
    assert!(batch.inventory_queued);
    assert_eq!(env.queue.completed_jobs(QueueName::InventorySync).len(), 1);
}

#[tokio::test]
async fn test_progress_half_done() {
    let env = TestEnv::new(StubVision::new());
    let assets: Vec<_> = (0..4).map(|i| asset(&format!("p{i}.jpg"), None)).collect();
    let (batch, photos) = env.submit(&assets).await;

    env.store.set_photo_status(photos[0].id, PhotoStatus::Done);
    env.store.set_photo_status(photos[1].id, PhotoStatus::Done);

    let progress = env.aggregator.compute_batch_progress(batch.id).await.unwrap();
    assert_eq!(progress.progress, 50);
    assert_eq!(progress.counts.total, 4);
    assert_eq!(progress.counts.completed, 2);
    assert_eq!(progress.counts.queued, 2);
    assert!(progress.inventory_summary.is_none());
}

#[tokio::test]
async fn test_completed_batch_progress_includes_inventory() {
    let env = TestEnv::new(StubVision::new().with_fixtures(FIXTURES));
    let (batch, _) = env
        .submit(&[fixture_asset(&LIVING_ROOM), fixture_asset(&BEDROOM)])
        .await;

    env.drain().await;

    let progress = env.aggregator.compute_batch_progress(batch.id).await.unwrap();
    assert_eq!(progress.status, BatchStatus::Completed);
    assert_eq!(progress.progress, 100);

    let summary = progress.inventory_summary.expect("completed batch has a summary");
    assert_eq!(summary.total_items, 3);
    assert!((summary.total_volume - 3.5).abs() < 1e-9);
    assert_eq!(summary.rooms.len(), 2);
    let living = summary
        .rooms
        .iter()
        .find(|r| r.room_type == "living_room")
        .unwrap();
    assert!((living.volume_m3 - LIVING_ROOM.total_volume()).abs() < 1e-9);
}

#[tokio::test]
async fn test_counts_always_sum_to_batch_size() {
    let env = TestEnv::new(StubVision::new().with_fixtures(FIXTURES));
    let assets = vec![
        fixture_asset(&LIVING_ROOM),
        asset("broken.jpg", None),
        fixture_asset(&KITCHEN),
    ];
    let (batch, _) = env.submit(&assets).await;

    while env.photo_pool.process_one().await.unwrap().is_some() {
        let batch = env.batch(batch.id).await;
        assert_eq!(batch.counts.total(), 3);
        let progress = env.aggregator.compute_batch_progress(batch.id).await.unwrap();
        assert_eq!(progress.counts.total, 3);
        assert!(progress.progress <= 100);
    }
}

#[tokio::test]
async fn test_inventory_latch_fires_once() {
    let env = TestEnv::new(StubVision::new());
    let (batch, photos) = env.submit(&[asset("a.jpg", None)]).await;

    // Not drained yet.
    assert!(!env.aggregator.should_trigger_inventory_sync(batch.id).await.unwrap());

    env.store.set_photo_status(photos[0].id, PhotoStatus::Done);
    env.aggregator.update_batch_counts(batch.id).await.unwrap();

    assert!(env.aggregator.should_trigger_inventory_sync(batch.id).await.unwrap());
    assert!(!env.aggregator.should_trigger_inventory_sync(batch.id).await.unwrap());
    assert!(env.batch(batch.id).await.inventory_queued);
}

#[tokio::test]
async fn test_concurrent_settles_enqueue_inventory_once() {
    let env = TestEnv::new(StubVision::new());
    let assets: Vec<_> = (0..6).map(|i| asset(&format!("p{i}.jpg"), None)).collect();
    let (batch, photos) = env.submit(&assets).await;
    for photo in &photos {
        env.store.set_photo_status(photo.id, PhotoStatus::Done);
    }

    let settles = (0..8).map(|_| env.aggregator.on_photo_settled(batch.id));
    let outcomes = futures::future::join_all(settles).await;

    let triggered = outcomes
        .into_iter()
        .map(Result::unwrap)
        .filter(|outcome| outcome.inventory_job.is_some())
        .count();
    assert_eq!(triggered, 1);
    assert_eq!(env.queue.waiting_ids(QueueName::InventorySync).len(), 1);
}

#[tokio::test]
async fn test_concurrent_pool_run_processes_everything() {
    let env = TestEnv::new(
        StubVision::new()
            .with_fixtures(FIXTURES)
            .with_delay(Duration::from_millis(5)),
    );
    let assets: Vec<_> = (0..10)
        .map(|i| asset(&format!("room-{i}.jpg"), Some(FIXTURES[i % 3].room_type)))
        .collect();
    let (batch, _) = env.submit(&assets).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let photo_task = tokio::spawn(env.photo_pool.clone().run(shutdown_rx.clone()));
    let inventory_task = tokio::spawn(env.inventory_pool.clone().run(shutdown_rx));

    let settled = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let batch = env.batch(batch.id).await;
            if batch.status.is_settled()
                && env.queue.completed_jobs(QueueName::InventorySync).len() == 1
            {
                return batch;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("batch did not settle");

    shutdown_tx.send(true).unwrap();
    photo_task.await.unwrap();
    inventory_task.await.unwrap();

    assert_eq!(settled.status, BatchStatus::Completed);
    assert_eq!(settled.counts.completed, 10);
    assert_eq!(env.vision.analyze_calls(), 10);
    assert_eq!(env.photo_pool.jobs_completed(), 10);
    assert_eq!(env.inventory_pool.jobs_completed(), 1);
}

#[tokio::test]
async fn test_redelivered_done_job_is_skipped() {
    let env = TestEnv::new(StubVision::new().with_fixtures(FIXTURES));
    let (batch, photos) = env.submit(&[fixture_asset(&BEDROOM)]).await;
    env.drain().await;
    assert_eq!(env.vision.analyze_calls(), 1);

    let job = analyze_job(&env, photos[0].id, batch.id, false);
    let outcome = env.photo_worker.process(&job, 1, false).await.unwrap();

    assert_eq!(outcome, PhotoJobOutcome::Skipped { photo_id: photos[0].id });
    assert_eq!(env.vision.analyze_calls(), 1);
    let photo = env.photo(photos[0].id).await;
    assert_eq!(photo.status, PhotoStatus::Done);
    assert_eq!(photo.analysis, Some(BEDROOM.analysis()));
}

#[tokio::test]
async fn test_force_reanalyzes_done_photo() {
    let env = TestEnv::new(StubVision::new().with_fixtures(FIXTURES));
    let (batch, photos) = env.submit(&[fixture_asset(&KITCHEN)]).await;
    env.drain().await;

    env.queue
        .enqueue_photo_analysis(&analyze_job(&env, photos[0].id, batch.id, true))
        .await
        .unwrap();
    env.drain().await;

    assert_eq!(env.vision.analyze_calls(), 2);
    let photo = env.photo(photos[0].id).await;
    assert_eq!(photo.status, PhotoStatus::Done);
    assert_eq!(env.batch(batch.id).await.status, BatchStatus::Completed);
    // The latch is not reset by a forced re-run.
    assert_eq!(env.queue.completed_jobs(QueueName::InventorySync).len(), 1);
}

#[tokio::test]
async fn test_retryable_failure_keeps_photo_processing() {
    let env = TestEnv::new(
        StubVision::new().failing_with(vec![status_error(503, "upstream overloaded")]),
    );
    let (batch, photos) = env.submit(&[asset("a.jpg", Some("kitchen"))]).await;
    let job = analyze_job(&env, photos[0].id, batch.id, false);

    let failure = env.photo_worker.process(&job, 1, false).await.unwrap_err();
    assert_eq!(failure.code, ErrorCode::ProviderDown);
    assert!(failure.retryable);

    let photo = env.photo(photos[0].id).await;
    assert_eq!(photo.status, PhotoStatus::Processing);
    assert_eq!(photo.error_code, Some(ErrorCode::ProviderDown));

    let batch = env.batch(batch.id).await;
    assert_eq!(batch.status, BatchStatus::Processing);
    assert!(!batch.inventory_queued);
}

#[tokio::test]
async fn test_retry_then_success_through_pool() {
    let env = TestEnv::new(
        StubVision::new()
            .with_fixtures(FIXTURES)
            .failing_with(vec![status_error(429, "slow down"), VisionError::Timeout(60_000)]),
    );
    let (batch, photos) = env.submit(&[fixture_asset(&LIVING_ROOM)]).await;

    assert_eq!(env.photo_pool.process_one().await.unwrap(), Some(Disposition::Retried));
    assert_eq!(env.photo_pool.process_one().await.unwrap(), Some(Disposition::Retried));
    assert_eq!(env.photo_pool.process_one().await.unwrap(), Some(Disposition::Completed));

    let photo = env.photo(photos[0].id).await;
    assert_eq!(photo.status, PhotoStatus::Done);
    assert!(photo.error_code.is_none());
    assert!(photo.error_message.is_none());
    assert_eq!(env.batch(batch.id).await.status, BatchStatus::Completed);

    let calls: Vec<_> = env
        .ai_calls(3)
        .await
        .into_iter()
        .filter(|c| c.operation == AiOperation::AnalyzePhoto)
        .collect();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].error_type, Some(ErrorCode::RateLimit));
    assert_eq!(calls[1].error_type, Some(ErrorCode::Timeout));
    assert!(calls[2].success);
    assert_eq!(calls[2].retries, 2);
}

#[tokio::test]
async fn test_exhausted_retries_mark_photo_error() {
    let env = TestEnv::new(StubVision::new().failing_with(vec![
        status_error(503, "down"),
        status_error(503, "down"),
        status_error(503, "down"),
    ]));
    let (batch, photos) = env.submit(&[asset("a.jpg", Some("bedroom"))]).await;

    env.drain().await;

    assert_eq!(env.vision.analyze_calls(), 3);
    assert_eq!(env.photo_pool.jobs_failed(), 1);
    let photo = env.photo(photos[0].id).await;
    assert_eq!(photo.status, PhotoStatus::Error);
    assert_eq!(photo.error_code, Some(ErrorCode::ProviderDown));
    assert_eq!(
        photo.error_message.as_deref(),
        Some("The analysis provider is unavailable")
    );
    assert_eq!(env.batch(batch.id).await.status, BatchStatus::Failed);
}

#[tokio::test]
async fn test_analysis_timeout_on_final_attempt_settles_batch() {
    let env = TestEnv::with_job_timeout(
        StubVision::new().with_delay(Duration::from_millis(300)),
        Duration::from_millis(50),
    );
    let (batch, photos) = env.submit(&[asset("slow.jpg", Some("bedroom"))]).await;

    assert_eq!(env.photo_pool.process_one().await.unwrap(), Some(Disposition::Retried));
    // Still in flight between attempts.
    let photo = env.photo(photos[0].id).await;
    assert_eq!(photo.status, PhotoStatus::Processing);
    assert_eq!(photo.error_code, Some(ErrorCode::Timeout));
    assert!(!env.batch(batch.id).await.status.is_settled());

    assert_eq!(env.photo_pool.process_one().await.unwrap(), Some(Disposition::Retried));
    assert_eq!(env.photo_pool.process_one().await.unwrap(), Some(Disposition::Failed));
    assert_eq!(env.photo_pool.process_one().await.unwrap(), None);

    assert_eq!(env.vision.analyze_calls(), 3);
    let photo = env.photo(photos[0].id).await;
    assert_eq!(photo.status, PhotoStatus::Error);
    assert_eq!(photo.error_code, Some(ErrorCode::Timeout));

    let settled = env.batch(batch.id).await;
    assert_eq!(settled.status, BatchStatus::Failed);
    assert_eq!(settled.counts.failed, 1);
    assert_eq!(settled.counts.processing, 0);
    assert_eq!(settled.counts.queued, 0);
    assert!(settled.inventory_queued);
    assert_eq!(env.queue.waiting_ids(QueueName::InventorySync).len(), 1);
    assert_eq!(env.queue.stats(QueueName::PhotoAnalyze).await.unwrap().failed, 1);
}

#[tokio::test]
async fn test_store_failure_on_final_attempt_settles_batch() {
    let env = TestEnv::new(StubVision::new().with_fixtures(FIXTURES));
    env.store.fail_completions(3);
    let (batch, photos) = env.submit(&[fixture_asset(&BEDROOM)]).await;

    env.drain().await;

    assert_eq!(env.vision.analyze_calls(), 3);
    let photo = env.photo(photos[0].id).await;
    assert_eq!(photo.status, PhotoStatus::Error);
    // Persistence errors are not matched against provider patterns.
    assert_eq!(photo.error_code, Some(ErrorCode::Unknown));
    assert!(photo
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("pool timed out")));

    let settled = env.batch(batch.id).await;
    assert_eq!(settled.status, BatchStatus::Failed);
    assert_eq!(env.queue.completed_jobs(QueueName::InventorySync).len(), 1);
}

#[tokio::test]
async fn test_transient_store_failure_is_retried() {
    let env = TestEnv::new(StubVision::new().with_fixtures(FIXTURES));
    env.store.fail_completions(1);
    let (batch, photos) = env.submit(&[fixture_asset(&BEDROOM)]).await;

    env.drain().await;

    assert_eq!(env.vision.analyze_calls(), 2);
    let photo = env.photo(photos[0].id).await;
    assert_eq!(photo.status, PhotoStatus::Done);
    assert_eq!(photo.error_code, None);
    assert_eq!(env.batch(batch.id).await.status, BatchStatus::Completed);
}

#[tokio::test]
async fn test_bad_input_fails_without_retry() {
    let env = TestEnv::new(
        StubVision::new().failing_with(vec![status_error(400, "image could not be decoded")]),
    );
    let (batch, photos) = env.submit(&[asset("a.jpg", Some("bedroom"))]).await;

    assert_eq!(env.photo_pool.process_one().await.unwrap(), Some(Disposition::Failed));
    assert_eq!(env.photo_pool.process_one().await.unwrap(), None);

    assert_eq!(env.vision.analyze_calls(), 1);
    let photo = env.photo(photos[0].id).await;
    assert_eq!(photo.status, PhotoStatus::Error);
    assert_eq!(photo.error_code, Some(ErrorCode::BadInput));
    assert_eq!(env.batch(batch.id).await.status, BatchStatus::Failed);
}

#[tokio::test]
async fn test_missing_photo_is_fatal() {
    let env = TestEnv::new(StubVision::new());
    let (batch, _) = env.submit(&[asset("a.jpg", None)]).await;

    let job = analyze_job(&env, Uuid::new_v4(), batch.id, false);
    let failure = env.photo_worker.process(&job, 1, false).await.unwrap_err();
    assert_eq!(failure.code, ErrorCode::BadInput);
    assert!(!failure.retryable);
}

#[tokio::test]
async fn test_room_detection_used_when_no_hint() {
    let env = TestEnv::new(
        StubVision::new()
            .with_fixtures(FIXTURES)
            .detecting("kitchen"),
    );
    let (_, photos) = env.submit(&[asset("unlabeled.jpg", None)]).await;

    env.drain().await;

    assert_eq!(env.vision.detect_calls(), 1);
    let photo = env.photo(photos[0].id).await;
    assert_eq!(photo.room_type.as_deref(), Some("kitchen"));
    assert_eq!(photo.analysis, Some(KITCHEN.analysis()));
}

#[tokio::test]
async fn test_room_detection_failure_does_not_fail_job() {
    let sofa_only = PhotoAnalysis::from_items(vec![measured_sofa()]);
    let env = TestEnv::new(StubVision::new().with_default(sofa_only.clone()));
    let (batch, photos) = env.submit(&[asset("unlabeled.jpg", None)]).await;

    env.drain().await;

    assert_eq!(env.vision.detect_calls(), 1);
    let photo = env.photo(photos[0].id).await;
    assert_eq!(photo.status, PhotoStatus::Done);
    assert!(photo.room_type.is_none());
    assert_eq!(photo.analysis, Some(sofa_only));
    assert_eq!(env.batch(batch.id).await.status, BatchStatus::Completed);

    let detect = env
        .ai_calls(2)
        .await
        .into_iter()
        .find(|c| c.operation == AiOperation::DetectRoom)
        .expect("room detection was recorded");
    assert!(!detect.success);
    assert_eq!(detect.error_type, Some(ErrorCode::Timeout));
}

#[tokio::test]
async fn test_room_hint_skips_detection() {
    let env = TestEnv::new(StubVision::new().with_fixtures(FIXTURES).detecting("garage"));
    env.submit(&[fixture_asset(&BEDROOM)]).await;

    env.drain().await;

    assert_eq!(env.vision.detect_calls(), 0);
}

#[tokio::test]
async fn test_inventory_job_summarizes_batch() {
    let env = TestEnv::new(StubVision::new().with_fixtures(FIXTURES));
    let (batch, _) = env
        .submit(&[
            fixture_asset(&LIVING_ROOM),
            fixture_asset(&BEDROOM),
            fixture_asset(&KITCHEN),
        ])
        .await;

    env.drain().await;

    let finished = env.queue.completed_jobs(QueueName::InventorySync);
    assert_eq!(finished.len(), 1);
    let summary = finished[0].result.as_ref().unwrap();
    assert_eq!(summary["totalItems"], 5);
    assert_eq!(summary["photosCount"], 3);
    let expected: f64 = FIXTURES.iter().map(|f| f.total_volume()).sum();
    let total = summary["totalVolume"].as_f64().unwrap();
    assert!((total - expected).abs() < 1e-9);
    assert!(env.batch(batch.id).await.inventory_queued);
}

#[tokio::test]
async fn test_resubmitting_live_job_is_deduplicated() {
    let env = TestEnv::new(StubVision::new());
    let (batch, photos) = env.submit(&[asset("a.jpg", None)]).await;

    let handle = env
        .queue
        .enqueue_photo_analysis(&analyze_job(&env, photos[0].id, batch.id, false))
        .await
        .unwrap();
    assert!(handle.deduplicated);
    assert_eq!(env.queue.waiting_ids(QueueName::PhotoAnalyze).len(), 1);
}

#[tokio::test]
async fn test_create_batch_rejects_other_users() {
    let env = TestEnv::new(StubVision::new());
    let result = env
        .aggregator
        .create_batch(env.project.id, Uuid::new_v4(), &[asset("a.jpg", None)])
        .await;
    assert!(matches!(result, Err(BatchError::Unauthorized)));

    let result = env
        .aggregator
        .create_batch(Uuid::new_v4(), env.owner(), &[asset("a.jpg", None)])
        .await;
    assert!(matches!(result, Err(BatchError::NotFound(_))));
}

#[tokio::test]
async fn test_create_batch_rejects_empty() {
    let env = TestEnv::new(StubVision::new());
    let result = env.aggregator.create_batch(env.project.id, env.owner(), &[]).await;
    assert!(matches!(result, Err(BatchError::EmptyBatch)));
}

#[tokio::test]
async fn test_inventory_sync_on_demand() {
    let env = TestEnv::new(StubVision::new().with_fixtures(FIXTURES));
    let (first, _) = env.submit(&[fixture_asset(&LIVING_ROOM)]).await;
    env.drain().await;
    env.submit(&[fixture_asset(&BEDROOM)]).await;
    env.drain().await;

    let project_wide = env
        .inventory
        .sync(&InventorySyncJob {
            project_id: env.project.id,
            user_id: env.owner(),
            batch_id: None,
        })
        .await
        .unwrap();
    assert_eq!(project_wide.photos_count, 2);
    assert_eq!(project_wide.rooms.len(), 2);

    let scoped = env
        .inventory
        .sync(&InventorySyncJob {
            project_id: env.project.id,
            user_id: env.owner(),
            batch_id: Some(first.id),
        })
        .await
        .unwrap();
    assert_eq!(scoped.photos_count, 1);
    assert_eq!(scoped.rooms[0].room_type, "living_room");
}

#[test]
fn test_classifier_examples() {
    let rate = classify("Rate limit exceeded (429)");
    assert_eq!(rate.code, ErrorCode::RateLimit);
    assert!(rate.retryable);

    let bad = classify("Invalid request (400)");
    assert_eq!(bad.code, ErrorCode::BadInput);
    assert!(!bad.retryable);

    let network = classify("fetch failed: ECONNREFUSED");
    assert_eq!(network.code, ErrorCode::Network);

    let unknown = classify("something odd happened");
    assert_eq!(unknown.code, ErrorCode::Unknown);
    assert_eq!(unknown.message, "something odd happened");
    assert!(unknown.retryable);
}

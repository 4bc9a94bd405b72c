//! Live tests against real infrastructure.
//!
//! Run with: cargo test --test integration_test -- --ignored

mod helpers;

use helpers::*;
use restyle_autopick::{
    config::AppConfig,
    db,
    models::job::{JobRecord, JobStatus},
    services::{
        queue::{QueuedRun, RunQueue},
        storage::{upload_key, ImageStorage},
    },
};
use uuid::Uuid;

/// Integration test: store, storage and queue wiring.
///
/// This test verifies:
/// 1. The configured job store (save/load/latest)
/// 2. The configured image storage (put/get)
/// 3. The run queue (enqueue/dequeue/cancel/complete)
///
/// Note: This requires Redis and the configured backends, set up via
/// environment variables.
#[tokio::test]
#[ignore]
async fn test_full_integration() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let store = db::connect(&config).await.expect("Failed to initialize job store");
    let storage = ImageStorage::from_config(&config).expect("Failed to initialize storage");
    let queue = RunQueue::new(&config.redis_url).expect("Failed to initialize queue");

    store.health_check().await.expect("Job store unhealthy");
    storage.health_check().await.expect("Storage unhealthy");
    queue.health_check().await.expect("Redis unhealthy");

    // 1. Upload the inputs
    let job_id = Uuid::new_v4();
    let key = job_id.to_string();
    let subject = portrait(AUBURN);
    let subject_ref = storage
        .put(&upload_key(&key, "subject", "png"), &subject, "image/png")
        .await
        .expect("Upload failed");
    assert_eq!(storage.get(&subject_ref).await.expect("Download failed"), subject);

    // 2. Job record round-trip
    let mut job = JobRecord::new();
    job.meta.subject_ref = Some(subject_ref.clone());
    store.save(job_id, &job).await.expect("Save failed");
    assert_eq!(store.load(job_id).await.expect("Load failed"), job);
    let (latest_id, _) = store.latest().await.expect("Latest failed").expect("No latest job");
    assert_eq!(latest_id, job_id);

    // 3. Queue round-trip with cancellation
    let run = QueuedRun {
        job_id,
        subject_ref: subject_ref.clone(),
        style_ref: subject_ref,
        target_hex: Some("#783c14".to_string()),
        style_desc: None,
        min_candidates: Some(1),
        max_rounds: Some(1),
        max_size: None,
    };
    queue.enqueue(&run).await.expect("Enqueue failed");
    let mut found = None;
    while let Some(next) = queue.dequeue().await.expect("Dequeue failed") {
        if next.job_id == job_id {
            found = Some(next);
            break;
        }
        // Leave other runs for the worker
        queue.enqueue(&next).await.expect("Re-enqueue failed");
        queue.complete(&next).await.expect("Complete failed");
    }
    let dequeued = found.expect("Run not found in queue");
    assert_eq!(dequeued, run);

    queue.request_cancel(job_id).await.expect("Cancel failed");
    assert!(queue.is_cancelled(job_id).await.expect("Cancel check failed"));
    queue.complete(&dequeued).await.expect("Complete failed");
    assert!(!queue.is_cancelled(job_id).await.expect("Cancel check failed"));
}

/// End-to-end: submit a run to a live server and wait for the worker.
///
/// Requires the API (E2E_BASE_URL, default http://localhost:5050) and a
/// worker with a working Gemini key.
#[tokio::test]
#[ignore]
async fn test_e2e_run() {
    let base_url = std::env::var("E2E_BASE_URL").unwrap_or_else(|_| "http://localhost:5050".to_string());
    let client = reqwest::Client::new();

    let health = client.get(format!("{}/health", base_url)).send().await.expect("Server unreachable");
    assert!(health.status().is_success(), "Server is not healthy");

    let submitted = upload_run(&client, &base_url, portrait(AUBURN), portrait(AUBURN), Some("#783c14"))
        .await
        .expect("Submit failed");
    assert_eq!(submitted.status, "queued");

    let job = poll_job(&client, &base_url, submitted.job_id, 300)
        .await
        .expect("Job did not finish");

    match job.status {
        JobStatus::Succeeded => {
            assert!(!job.results.is_empty());
            let idx = job.meta.autopick_index.expect("Succeeded job without a pick");
            assert!(idx >= 1 && idx <= job.results.len());
        }
        JobStatus::Failed => assert!(job.error.is_some()),
        JobStatus::Processing => unreachable!(),
    }
}

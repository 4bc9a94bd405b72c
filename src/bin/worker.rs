use restyle_autopick::{
    config::{AppConfig, PipelineConfig},
    db,
    services::{
        generation::GeminiClient,
        pipeline::Pipeline,
        queue::RunQueue,
        storage::ImageStorage,
        topup::CancelFlag,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second
const CANCEL_POLL_INTERVAL_MS: u64 = 2000;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    tracing::info!("Starting restyle worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    let pipeline_config = PipelineConfig::from_env().expect("Failed to load pipeline configuration");

    // Initialize services
    tracing::info!("Initializing services");
    let store = db::connect(&config).await.expect("Failed to initialize job store");
    let storage = ImageStorage::from_config(&config).expect("Failed to initialize image storage");
    let queue = Arc::new(RunQueue::new(&config.redis_url).expect("Failed to initialize run queue"));
    let gemini = Arc::new(
        GeminiClient::new(&config.gemini_api_key, &config.gemini_image_model, &config.gemini_text_model)
            .expect("Failed to initialize Gemini client"),
    );

    let pipeline = Pipeline {
        generator: gemini.clone(),
        analyzer: gemini,
        store,
        storage: Arc::new(storage),
        config: Arc::new(pipeline_config),
        region: config.region.clone(),
    };

    tracing::info!("Worker ready, starting run processing loop");

    // Main processing loop
    loop {
        match process_next_run(&pipeline, &queue).await {
            Ok(true) => {
                tracing::debug!("Run processed, checking for next run");
            }
            Ok(false) => {
                tracing::trace!("No runs available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing run");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Process the next run from the queue.
/// Returns Ok(true) if a run was processed, Ok(false) if none was available.
async fn process_next_run(pipeline: &Pipeline, queue: &Arc<RunQueue>) -> Result<bool, Box<dyn std::error::Error>> {
    if let Ok(depth) = queue.queue_depth().await {
        metrics::gauge!("run_queue_depth").set(depth as f64);
    }

    let run = match queue.dequeue().await? {
        Some(r) => r,
        None => return Ok(false),
    };

    tracing::info!(
        job_id = %run.job_id,
        min_candidates = ?run.min_candidates,
        max_rounds = ?run.max_rounds,
        "Processing run"
    );

    // A cancel sent while the run was queued must stop it before any call
    let cancel = CancelFlag::new();
    queue.check_cancellation(run.job_id, &cancel).await;
    let watcher = {
        let queue = queue.clone();
        let cancel = cancel.clone();
        let job_id = run.job_id;
        tokio::spawn(async move {
            queue
                .watch_cancellation(job_id, cancel, Duration::from_millis(CANCEL_POLL_INTERVAL_MS))
                .await
        })
    };

    let result = pipeline.run(&run, &cancel).await;
    watcher.abort();

    // Generation never retries at this level: top-up already spent its budget
    if let Err(e) = result {
        tracing::error!(job_id = %run.job_id, error = %e, code = %e.code(), "Run failed");
        if let Err(save) = pipeline.record_failure(run.job_id, e.code(), &e.to_string()).await {
            tracing::error!(job_id = %run.job_id, error = %save, "Cannot record failed run");
        }
        metrics::counter!("pipeline_jobs_failed").increment(1);
    }

    queue.complete(&run).await?;
    Ok(true)
}

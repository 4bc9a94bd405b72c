use axum::extract::DefaultBodyLimit;
use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use restyle_autopick::{
    app_state::AppState,
    config::{AppConfig, PipelineConfig},
    db, routes,
    services::{generation::GeminiClient, pipeline::Pipeline, queue::RunQueue, storage::ImageStorage},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let pipeline_config = PipelineConfig::from_env().expect("Failed to load pipeline configuration");

    tracing::info!("Initializing restyle-autopick server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("runs_submitted_total", "Total runs submitted through the API");
    metrics::describe_counter!("autopick_jobs_total", "Total selection passes");
    metrics::describe_counter!(
        "autopick_review_needed_total",
        "Selection passes that flagged the job for human review"
    );
    metrics::describe_gauge!("run_queue_depth", "Current number of pending runs in the queue");

    let store = db::connect(&config).await.expect("Failed to initialize job store");

    tracing::info!(backend = ?config.storage_backend, "Initializing image storage");
    let storage = ImageStorage::from_config(&config).expect("Failed to initialize image storage");

    tracing::info!("Connecting to Redis run queue");
    let queue = RunQueue::new(&config.redis_url).expect("Failed to initialize run queue");

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

    // Create shared application state
    let state = AppState::new(queue, pipeline);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/runs", post(routes::runs::submit_run))
        .route("/api/v1/jobs/latest", get(routes::jobs::latest_job))
        .route("/api/v1/jobs/{job_id}", get(routes::jobs::get_job))
        .route("/api/v1/jobs/{job_id}/topup", post(routes::jobs::topup_job))
        .route("/api/v1/jobs/{job_id}/autopick", post(routes::jobs::autopick_job))
        .route("/api/v1/jobs/{job_id}/cancel", post(routes::jobs::cancel_job))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(25 * 1024 * 1024)); // two photos

    tracing::info!("Starting restyle-autopick on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{JobRecord, JobStatus};
use crate::models::run::{AutopickRequest, AutopickResponse, CandidateSummary, LatestJobResponse, RunRequest, RunResponse};
use crate::routes::error::ApiError;
use crate::services::color_math::Rgb;
use crate::services::queue::QueuedRun;

/// GET /api/v1/jobs/{job_id}: Full job record.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobRecord>, ApiError> {
    Ok(Json(state.store.load(job_id).await?))
}

/// GET /api/v1/jobs/latest: Summary of the most recently updated job.
pub async fn latest_job(State(state): State<AppState>) -> Result<Json<LatestJobResponse>, ApiError> {
    let response = match state.store.latest().await? {
        Some((job_id, job)) => LatestJobResponse {
            job_id: Some(job_id),
            results_count: job.results.len(),
            meta: Some(job.meta),
        },
        None => LatestJobResponse {
            job_id: None,
            results_count: 0,
            meta: None,
        },
    };
    Ok(Json(response))
}

/// POST /api/v1/jobs/{job_id}/topup: Queue another run for an existing job.
///
/// Existing candidates count toward `min_candidates`.
pub async fn topup_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(params): Query<RunRequest>,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    params.validate()?;

    // Flip the job to processing before queueing so a second top-up is refused
    let claimed = state.pipeline.claim(job_id).await?;

    let run = QueuedRun {
        job_id,
        subject_ref: claimed.subject_ref,
        style_ref: claimed.style_ref,
        target_hex: params.target_hex,
        style_desc: params.style_desc,
        min_candidates: params.min_candidates,
        max_rounds: params.max_rounds,
        max_size: params.max_size,
    };
    if let Err(e) = state.queue.enqueue(&run).await {
        if let Err(restore) = state.store.save(job_id, &claimed.previous).await {
            tracing::error!(%job_id, error = %restore, "Cannot release job after failed enqueue");
        }
        return Err(e.into());
    }

    tracing::info!(%job_id, have = claimed.previous.results.len(), "Top-up queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(RunResponse {
            job_id,
            status: "queued".to_string(),
            message: "Top-up queued".to_string(),
        }),
    ))
}

/// POST /api/v1/jobs/{job_id}/autopick: Score unscored candidates and re-select.
pub async fn autopick_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(params): Query<AutopickRequest>,
) -> Result<Json<AutopickResponse>, ApiError> {
    params.validate()?;
    let target = params
        .target_hex
        .as_deref()
        .map(str::parse::<Rgb>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let (job, selection) = state.pipeline.rescore(job_id, target).await?;

    let candidates = job
        .results
        .iter()
        .enumerate()
        .map(|(i, c)| CandidateSummary {
            index: i + 1,
            reference: c.reference.clone(),
            scores: c.scores,
            score_error: c.score_error.clone(),
        })
        .collect();

    Ok(Json(AutopickResponse {
        job_id,
        target_hex: job.meta.target_hex.unwrap_or_default(),
        autopick_index: selection.autopick_index,
        review_needed: selection.review_needed,
        candidates,
    }))
}

/// POST /api/v1/jobs/{job_id}/cancel: Ask the worker to stop after the current batch.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    let job = state.store.load(job_id).await?;
    if job.status != JobStatus::Processing {
        return Err(ApiError::Conflict(format!("Job {} is already {}", job_id, job.status)));
    }

    state.queue.request_cancel(job_id).await?;
    tracing::info!(%job_id, "Cancellation requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(RunResponse {
            job_id,
            status: "cancelling".to_string(),
            message: "Collected candidates are kept".to_string(),
        }),
    ))
}

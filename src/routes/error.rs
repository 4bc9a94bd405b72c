use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::db::StoreError;
use crate::models::job::{ErrorCode, JobRecord};
use crate::services::pipeline::{ClaimError, PipelineError, RescoreError};
use crate::services::queue::QueueError;
use crate::services::storage::StorageError;

/// Errors returned by the API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Unsupported image format for {0}")]
    UnsupportedMedia(String),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    /// Reading or writing a job record or image failed.
    #[error("{0}")]
    Storage(String),

    #[error("Run queue unavailable: {0}")]
    QueueUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            ApiError::Storage(_) => {
                tracing::error!(error = %message, "Storage error");
                let body = JobRecord::storage_failure(message);
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
            ApiError::QueueUnavailable(_) => {
                tracing::error!(error = %message, "Run queue error");
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": message }))).into_response()
            }
            other => {
                let status = match other {
                    ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
                    ApiError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    ApiError::NotFound(_) => StatusCode::NOT_FOUND,
                    ApiError::Conflict(_) => StatusCode::CONFLICT,
                    _ => StatusCode::UNPROCESSABLE_ENTITY,
                };
                tracing::info!(status = status.as_u16(), error = %message, "Request rejected");
                (status, Json(json!({ "error": message }))).into_response()
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ApiError::NotFound(id),
            other => ApiError::Storage(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Storage(e.to_string())
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        ApiError::QueueUnavailable(e.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Store(inner) => inner.into(),
            PipelineError::MissingInput(_) => ApiError::Conflict(e.to_string()),
            other if other.code() == ErrorCode::ImageDecodeError => ApiError::Unprocessable(other.to_string()),
            other => ApiError::Storage(other.to_string()),
        }
    }
}

impl From<RescoreError> for ApiError {
    fn from(e: RescoreError) -> Self {
        match e {
            RescoreError::Pipeline(inner) => inner.into(),
            other => ApiError::Conflict(other.to_string()),
        }
    }
}

impl From<ClaimError> for ApiError {
    fn from(e: ClaimError) -> Self {
        match e {
            ClaimError::Store(inner) => inner.into(),
            other => ApiError::Conflict(other.to_string()),
        }
    }
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        ApiError::BadRequest(report.to_string())
    }
}

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use std::str::FromStr;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::JobRecord;
use crate::models::run::{RunRequest, RunResponse};
use crate::routes::error::ApiError;
use crate::services::queue::QueuedRun;
use crate::services::storage::{image_kind, upload_key};

/// Photos and parameters pulled out of the multipart body.
#[derive(Default)]
struct RunUpload {
    subject: Option<Vec<u8>>,
    style: Option<Vec<u8>>,
    params: RunRequest,
}

fn parse_number<T: FromStr>(name: &str, text: &str) -> Result<Option<T>, ApiError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse()
        .map(Some)
        .map_err(|_| ApiError::BadRequest(format!("{} must be an integer", name)))
}

async fn read_upload(mut multipart: Multipart) -> Result<RunUpload, ApiError> {
    let mut upload = RunUpload::default();
    let bad_body = |e: axum::extract::multipart::MultipartError| ApiError::BadRequest(e.body_text());

    while let Some(field) = multipart.next_field().await.map_err(bad_body)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "subject" | "style" => {
                let data = field.bytes().await.map_err(bad_body)?;
                image::guess_format(&data).map_err(|_| ApiError::UnsupportedMedia(name.clone()))?;
                if name == "subject" {
                    upload.subject = Some(data.to_vec());
                } else {
                    upload.style = Some(data.to_vec());
                }
            }
            _ => {
                let text = field.text().await.map_err(bad_body)?;
                let value = Some(text.trim().to_string()).filter(|t| !t.is_empty());
                let params = &mut upload.params;
                match name.as_str() {
                    "target_hex" => params.target_hex = value,
                    "style_desc" => params.style_desc = value,
                    "min_candidates" => params.min_candidates = parse_number(&name, &text)?,
                    "max_rounds" => params.max_rounds = parse_number(&name, &text)?,
                    "max_size" => params.max_size = parse_number(&name, &text)?,
                    other => tracing::debug!(field = other, "Ignoring unknown form field"),
                }
            }
        }
    }

    Ok(upload)
}

/// POST /api/v1/runs: Upload a subject and a style photo and queue a run.
pub async fn submit_run(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    let upload = read_upload(multipart).await?;
    let subject = upload
        .subject
        .ok_or_else(|| ApiError::BadRequest("subject photo is required".to_string()))?;
    let style = upload
        .style
        .ok_or_else(|| ApiError::BadRequest("style photo is required".to_string()))?;
    let params = upload.params;
    params.validate()?;

    let job_id = Uuid::new_v4();
    let key = job_id.to_string();
    let (extension, content_type) = image_kind(&subject);
    let subject_ref = state
        .storage
        .put(&upload_key(&key, "subject", extension), &subject, content_type)
        .await?;
    let (extension, content_type) = image_kind(&style);
    let style_ref = state
        .storage
        .put(&upload_key(&key, "style", extension), &style, content_type)
        .await?;

    let mut job = JobRecord::new();
    job.meta.subject_ref = Some(subject_ref.clone());
    job.meta.style_ref = Some(style_ref.clone());
    state.store.save(job_id, &job).await?;

    let run = QueuedRun {
        job_id,
        subject_ref,
        style_ref,
        target_hex: params.target_hex,
        style_desc: params.style_desc,
        min_candidates: params.min_candidates,
        max_rounds: params.max_rounds,
        max_size: params.max_size,
    };
    state.queue.enqueue(&run).await?;

    metrics::counter!("runs_submitted_total").increment(1);
    tracing::info!(%job_id, "Run queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(RunResponse {
            job_id,
            status: "queued".to_string(),
            message: "Run queued for generation".to_string(),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number::<u32>("max_rounds", " 3 ").unwrap(), Some(3));
        assert_eq!(parse_number::<u32>("max_rounds", "").unwrap(), None);
        assert!(parse_number::<u32>("max_rounds", "three").is_err());
    }
}

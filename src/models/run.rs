use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::color_math::Rgb;

pub const MIN_CANDIDATES_RANGE: (u32, u32) = (1, 6);
pub const MAX_ROUNDS_RANGE: (u32, u32) = (1, 5);
pub const MAX_SIZE_RANGE: (u32, u32) = (512, 2048);

/// Parameters of a run (metadata portion of the multipart upload).
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RunRequest {
    #[garde(custom(validate_target_hex))]
    pub target_hex: Option<String>,

    #[garde(length(min = 1, max = 500))]
    pub style_desc: Option<String>,

    #[garde(range(min = 1, max = 6))]
    pub min_candidates: Option<u32>,

    #[garde(range(min = 1, max = 5))]
    pub max_rounds: Option<u32>,

    #[garde(range(min = 512, max = 2048))]
    pub max_size: Option<u32>,
}

fn validate_target_hex(value: &Option<String>, _ctx: &()) -> garde::Result {
    match value {
        Some(hex) if hex.parse::<Rgb>().is_err() => {
            Err(garde::Error::new("target_hex must look like #RRGGBB"))
        }
        _ => Ok(()),
    }
}

/// Body of `POST /api/v1/jobs/{id}/autopick`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct AutopickRequest {
    #[garde(custom(validate_target_hex))]
    pub target_hex: Option<String>,
}

/// Response after submitting a run.
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub job_id: Uuid,
    pub status: String,
    pub message: String,
}

/// Response for the most recent job.
#[derive(Debug, Serialize)]
pub struct LatestJobResponse {
    pub job_id: Option<Uuid>,
    pub results_count: usize,
    pub meta: Option<crate::models::job::JobMeta>,
}

/// One line of the autopick summary.
#[derive(Debug, Serialize)]
pub struct CandidateSummary {
    pub index: usize,
    pub reference: String,
    pub scores: Option<crate::models::job::Scores>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_error: Option<String>,
}

/// Response of a synchronous re-score.
#[derive(Debug, Serialize)]
pub struct AutopickResponse {
    pub job_id: Uuid,
    pub target_hex: String,
    pub autopick_index: Option<usize>,
    pub review_needed: bool,
    pub candidates: Vec<CandidateSummary>,
}

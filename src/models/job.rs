use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Status of a generation job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Processing,
    Succeeded,
    Failed,
}

/// Error taxonomy shared by the pipeline, the worker and the API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Generator returned no image (refusal or abstention).
    GenerationEmpty,
    /// A generation call exceeded its deadline.
    GenerationTimeout,
    /// Image bytes could not be decoded or cropped.
    ImageDecodeError,
    /// Job record could not be read, parsed or written.
    StorageError,
    /// The run was cancelled before any candidate was collected.
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
}

/// Integer quality scores attached to a candidate, each in 0..=100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scores {
    pub identity: u8,
    pub color: u8,
    pub total: u8,
}

/// One generated image and, once scored, its quality scores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    /// Opaque locator of the image bytes (`file://` URL or `r2://` key).
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<Scores>,
    /// Why scoring this candidate failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_error: Option<String>,
}

impl Candidate {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            scores: None,
            score_error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JobMeta {
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub cost_estimate_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub rounds_used: u32,

    /// 1-based index into `results`, only set after scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autopick_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autopick_reason: Option<String>,
    #[serde(default)]
    pub review_needed: bool,

    // Inputs kept so the job can be topped up or re-scored later
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_desc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Persisted state of one generation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JobRecord {
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub results: Vec<Candidate>,
    #[serde(default)]
    pub meta: JobMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl JobRecord {
    /// A fresh record in `processing` state.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            meta: JobMeta {
                created_at: Some(now),
                updated_at: Some(now),
                ..JobMeta::default()
            },
            ..Self::default()
        }
    }

    /// Record returned to readers when the stored record itself is unreadable.
    pub fn storage_failure(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            error: Some(JobError {
                code: ErrorCode::StorageError,
                message: message.into(),
            }),
            ..Self::default()
        }
    }

    pub fn fail(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(JobError {
            code,
            message: message.into(),
        });
    }

    /// Best-effort completion: any collected candidate makes the job deliverable.
    pub fn is_deliverable(&self) -> bool {
        !self.results.is_empty()
    }

    /// The auto-picked candidate, if selection has run.
    pub fn autopick(&self) -> Option<&Candidate> {
        self.meta
            .autopick_index
            .and_then(|idx| idx.checked_sub(1))
            .and_then(|idx| self.results.get(idx))
    }

    pub fn touch(&mut self) {
        self.meta.updated_at = Some(Utc::now());
    }
}

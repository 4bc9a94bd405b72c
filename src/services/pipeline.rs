//! End-to-end run of one job: top up candidates, score them, pick the best.
//!
//! The pipeline owns the `JobRecord` for the duration of a run and is its
//! only writer; readers see whatever the last atomic save left behind.

use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::db::{JobStore, StoreError};
use crate::models::job::{ErrorCode, JobRecord, JobStatus};
use crate::models::style::DEFAULT_COLOR_HEX;
use crate::services::autopick::{self, Selection};
use crate::services::color_math::Rgb;
use crate::services::generation::{build_prompt, GenerationClient, GenerationRequest};
use crate::services::imaging::{self, ImageError, SWATCH_SIZE};
use crate::services::queue::QueuedRun;
use crate::services::storage::{ImageStorage, StorageError};
use crate::services::style::StyleAnalyzer;
use crate::services::topup::{CancelFlag, TopUpController, TopUpError};

/// Collaborators of a run. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    pub generator: Arc<dyn GenerationClient>,
    pub analyzer: Arc<dyn StyleAnalyzer>,
    pub store: Arc<dyn JobStore>,
    pub storage: Arc<ImageStorage>,
    pub config: Arc<PipelineConfig>,
    pub region: String,
}

fn default_target() -> Rgb {
    DEFAULT_COLOR_HEX.parse().unwrap_or(Rgb::new(0x22, 0x22, 0x22))
}

/// Store the target on the job, falling back to the default color.
fn record_target(job: &mut JobRecord, resolved: Option<Rgb>) -> Rgb {
    let rgb = resolved.unwrap_or_else(default_target);
    job.meta.target_hex = Some(rgb.to_hex());
    rgb
}

impl Pipeline {
    /// Process a queued run. Creates the job record if it does not exist
    /// yet, otherwise tops up the existing one.
    ///
    /// Generation outcomes (empty, timeouts) end up in the saved record;
    /// an `Err` means the record or the images could not be read or written.
    pub async fn run(&self, run: &QueuedRun, cancel: &CancelFlag) -> Result<JobRecord, PipelineError> {
        let started = Instant::now();
        let job_id = run.job_id;

        let mut job = match self.store.load(job_id).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() => JobRecord::new(),
            Err(e) => return Err(e.into()),
        };

        job.status = JobStatus::Processing;
        job.error = None;
        job.meta.subject_ref = Some(run.subject_ref.clone());
        job.meta.style_ref = Some(run.style_ref.clone());
        job.meta.region = Some(self.region.clone());
        job.touch();
        self.store.save(job_id, &job).await?;

        let subject = self.storage.get(&run.subject_ref).await?;
        let style = self.storage.get(&run.style_ref).await?;

        if let Some(desc) = run.style_desc.as_deref().filter(|d| !d.trim().is_empty()) {
            job.meta.style_desc = Some(desc.trim().to_string());
        }
        // A run cancelled before it started makes no external calls at all
        let analyze = !cancel.is_cancelled();
        let resolved = self
            .resolve_target(&mut job, run.target_hex.as_deref(), &style, analyze)
            .await;
        let target = record_target(&mut job, resolved);

        // The default color only backs scoring, it is never sent as a swatch
        let swatch = resolved
            .map(|color| imaging::color_swatch(color, SWATCH_SIZE))
            .transpose()?;
        let max_size = run.max_size(&self.config.topup);
        let swatch_hex = resolved.map(|c| c.to_hex());
        let request = GenerationRequest {
            prompt: build_prompt(max_size, job.meta.style_desc.as_deref(), swatch_hex.as_deref()),
            subject,
            style,
            swatch,
        };

        let controller = TopUpController::new(
            self.generator.as_ref(),
            &self.storage,
            self.store.as_ref(),
            run.policy(&self.config.topup),
        );
        let outcome = controller.ensure_minimum(job_id, &mut job, &request, cancel).await?;

        if job.is_deliverable() {
            if let Err(e) = autopick::select(&mut job, &request.subject, target, &self.storage, &self.config.scoring).await {
                tracing::warn!(%job_id, error = %e, "Subject photo could not be scored, leaving pick to review");
                job.meta.review_needed = autopick::review_needed(&job.results, &self.config.scoring);
            }
        }

        job.touch();
        self.store.save(job_id, &job).await?;

        let elapsed = started.elapsed();
        metrics::histogram!("pipeline_processing_seconds").record(elapsed.as_secs_f64());
        match job.status {
            JobStatus::Failed => metrics::counter!("pipeline_jobs_failed").increment(1),
            _ => metrics::counter!("pipeline_jobs_completed").increment(1),
        }

        tracing::info!(
            %job_id,
            status = %job.status,
            candidates = job.results.len(),
            rounds_used = outcome.rounds_used,
            autopick_index = ?job.meta.autopick_index,
            review_needed = job.meta.review_needed,
            duration_ms = elapsed.as_millis() as u64,
            "Run complete"
        );

        Ok(job)
    }

    /// Pick the target color: the one already scored against, then the
    /// request, then the one on the job, then the style analyzer when
    /// `analyze` is set. Also fills in the style description from the
    /// analysis when none was given.
    async fn resolve_target(
        &self,
        job: &mut JobRecord,
        explicit: Option<&str>,
        style: &[u8],
        analyze: bool,
    ) -> Option<Rgb> {
        let recorded: Option<Rgb> = job.meta.target_hex.as_deref().and_then(|h| h.parse().ok());
        let explicit = explicit.and_then(|hex| match hex.parse::<Rgb>() {
            Ok(rgb) => Some(rgb),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unparsable target color");
                None
            }
        });

        let any_scored = job.results.iter().any(|c| c.scores.is_some());
        let mut target = match (recorded, explicit) {
            (Some(existing), Some(requested)) if any_scored && existing != requested => {
                tracing::warn!(%existing, %requested, "Keeping the target existing scores were computed against");
                Some(existing)
            }
            (recorded, explicit) => explicit.or(recorded),
        };

        if analyze && (target.is_none() || job.meta.style_desc.is_none()) {
            match self.analyzer.analyze(style).await {
                Ok(analysis) => {
                    if job.meta.style_desc.is_none() && !analysis.style_desc.is_empty() {
                        job.meta.style_desc = Some(analysis.style_desc);
                    }
                    if target.is_none() {
                        target = analysis.attributes.color_hex.parse().ok();
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Style analysis failed"),
            }
        }

        target
    }

    /// Record a run that ended in an error. Candidates already collected
    /// stay deliverable; otherwise the job fails with `code`.
    pub async fn record_failure(&self, job_id: Uuid, code: ErrorCode, message: &str) -> Result<JobRecord, StoreError> {
        let mut job = match self.store.load(job_id).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() => JobRecord::new(),
            Err(e) => return Err(e),
        };

        if job.is_deliverable() {
            job.status = JobStatus::Succeeded;
            job.error = None;
            job.meta.review_needed = autopick::review_needed(&job.results, &self.config.scoring);
        } else {
            job.fail(code, message);
        }
        job.touch();
        self.store.save(job_id, &job).await?;
        Ok(job)
    }

    /// Mark a finished job as processing so another run can be queued for
    /// it. The returned record is the job as it was before the claim.
    pub async fn claim(&self, job_id: Uuid) -> Result<Claimed, ClaimError> {
        let previous = self.store.load(job_id).await?;
        if previous.status == JobStatus::Processing {
            return Err(ClaimError::Busy);
        }
        let (Some(subject_ref), Some(style_ref)) = (previous.meta.subject_ref.clone(), previous.meta.style_ref.clone())
        else {
            return Err(ClaimError::NoInputs);
        };

        let mut job = previous.clone();
        job.status = JobStatus::Processing;
        job.error = None;
        job.touch();
        self.store.save(job_id, &job).await?;

        Ok(Claimed {
            previous,
            subject_ref,
            style_ref,
        })
    }

    /// Score any unscored candidates of a stored job and re-select.
    ///
    /// `target` may only differ from the job's recorded target while no
    /// candidate has been scored yet; scores are never recomputed.
    pub async fn rescore(&self, job_id: Uuid, target: Option<Rgb>) -> Result<(JobRecord, Selection), RescoreError> {
        let mut job = self.store.load(job_id).await.map_err(PipelineError::from)?;
        if job.status == JobStatus::Processing {
            return Err(RescoreError::Busy);
        }
        if !job.is_deliverable() {
            return Err(RescoreError::NothingToScore);
        }

        let recorded: Option<Rgb> = job.meta.target_hex.as_deref().and_then(|h| h.parse().ok());
        let any_scored = job.results.iter().any(|c| c.scores.is_some());
        let target = match (target, recorded) {
            (Some(requested), Some(existing)) if requested != existing && any_scored => {
                return Err(RescoreError::TargetConflict {
                    existing: existing.to_hex(),
                    requested: requested.to_hex(),
                });
            }
            (Some(requested), _) => requested,
            (None, Some(existing)) => existing,
            (None, None) => {
                let style_ref = job.meta.style_ref.clone().ok_or(PipelineError::MissingInput("style"))?;
                let style = self.storage.get(&style_ref).await.map_err(PipelineError::from)?;
                let resolved = self.resolve_target(&mut job, None, &style, true).await;
                record_target(&mut job, resolved)
            }
        };

        let subject_ref = job.meta.subject_ref.clone().ok_or(PipelineError::MissingInput("subject"))?;
        let subject = self.storage.get(&subject_ref).await.map_err(PipelineError::from)?;

        let selection = autopick::select(&mut job, &subject, target, &self.storage, &self.config.scoring)
            .await
            .map_err(PipelineError::from)?;

        job.touch();
        self.store.save(job_id, &job).await.map_err(PipelineError::from)?;
        Ok((job, selection))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    TopUp(#[from] TopUpError),

    #[error("Image processing failed: {0}")]
    Image(#[from] ImageError),

    #[error("Job has no {0} photo on record")]
    MissingInput(&'static str),
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::Store(e) => e.code(),
            PipelineError::TopUp(e) => e.code(),
            PipelineError::Image(e) => e.code(),
            PipelineError::Storage(_) | PipelineError::MissingInput(_) => ErrorCode::StorageError,
        }
    }
}

/// Failure of an on-demand re-score.
#[derive(Debug, thiserror::Error)]
pub enum RescoreError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Job is still processing")]
    Busy,

    #[error("Job has no candidates to score")]
    NothingToScore,

    #[error("Candidates were scored against {existing}, cannot re-score against {requested}")]
    TargetConflict { existing: String, requested: String },
}

/// A job taken for another run.
#[derive(Debug)]
pub struct Claimed {
    pub previous: JobRecord,
    pub subject_ref: String,
    pub style_ref: String,
}

/// Failure to take a job for another run.
#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Job is still processing")]
    Busy,

    #[error("Job has no input photos on record")]
    NoInputs,
}

//! Candidate scoring and best-candidate selection.
//!
//! Scoring is CPU-bound, so every candidate is decoded and scored on the
//! blocking pool. Failures stay local to their candidate: the others are
//! still scored and the pick is made among whatever succeeded.

use futures::future::join_all;
use std::sync::Arc;

use crate::config::ScoringConfig;
use crate::models::job::{Candidate, JobRecord, Scores};
use crate::services::color_math::Rgb;
use crate::services::hair_color;
use crate::services::identity::{self, FaceCrop};
use crate::services::imaging::{self, ImageError};
use crate::services::storage::ImageStorage;

pub const AUTOPICK_REASON: &str = "identity+color";

/// Result of a selection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// 1-based index of the chosen candidate.
    pub autopick_index: Option<usize>,
    pub review_needed: bool,
    pub scored: usize,
    pub failed: usize,
}

/// Weighted total. The identity score enters unrounded.
pub fn total_score(identity: f64, color: u8, cfg: &ScoringConfig) -> u8 {
    (cfg.identity_weight * identity + cfg.color_weight * color as f64)
        .round()
        .clamp(0.0, 100.0) as u8
}

/// Score one candidate image against the subject crop and target color.
pub fn score_candidate(
    subject: &FaceCrop,
    candidate: &[u8],
    target: Rgb,
    cfg: &ScoringConfig,
) -> Result<Scores, ImageError> {
    let img = imaging::decode(candidate)?;
    let identity = identity::score(subject, &FaceCrop::from_image(&img, cfg.identity_crop_size)?);
    let color = hair_color::score(&img, target, cfg);
    Ok(Scores {
        identity: identity.round() as u8,
        color,
        total: total_score(identity, color, cfg),
    })
}

/// 1-based index of the highest total. Ties go to the earliest candidate;
/// unscored candidates are skipped.
pub fn pick(results: &[Candidate]) -> Option<usize> {
    let mut best: Option<(usize, u8)> = None;
    for (i, candidate) in results.iter().enumerate() {
        if let Some(scores) = candidate.scores {
            if best.map_or(true, |(_, total)| scores.total > total) {
                best = Some((i + 1, scores.total));
            }
        }
    }
    best.map(|(idx, _)| idx)
}

/// True when any candidate falls below a threshold. An unscored candidate
/// counts as scoring zero, so nothing scored at all also needs review.
pub fn review_needed(results: &[Candidate], cfg: &ScoringConfig) -> bool {
    results.is_empty()
        || results.iter().any(|c| match c.scores {
            Some(s) => s.color < cfg.color_review_threshold || s.identity < cfg.identity_review_threshold,
            None => true,
        })
}

async fn score_one(
    storage: &ImageStorage,
    reference: String,
    subject: Arc<FaceCrop>,
    target: Rgb,
    cfg: Arc<ScoringConfig>,
) -> Result<Scores, String> {
    let bytes = storage.get(&reference).await.map_err(|e| e.to_string())?;
    tokio::task::spawn_blocking(move || score_candidate(&subject, &bytes, target, &cfg))
        .await
        .map_err(|e| format!("Scoring task failed: {}", e))?
        .map_err(|e| e.to_string())
}

/// Score every unscored candidate of `job`, then record the pick and the
/// review flag in its metadata.
///
/// Existing scores are kept as they are. Fails only when the subject photo
/// itself cannot be decoded or cropped.
pub async fn select(
    job: &mut JobRecord,
    subject: &[u8],
    target: Rgb,
    storage: &ImageStorage,
    cfg: &ScoringConfig,
) -> Result<Selection, ImageError> {
    let subject = Arc::new(FaceCrop::from_bytes(subject, cfg.identity_crop_size)?);
    let shared_cfg = Arc::new(cfg.clone());

    let pending: Vec<usize> = job
        .results
        .iter()
        .enumerate()
        .filter(|(_, c)| c.scores.is_none())
        .map(|(i, _)| i)
        .collect();

    let scored = join_all(pending.iter().map(|&i| {
        score_one(
            storage,
            job.results[i].reference.clone(),
            subject.clone(),
            target,
            shared_cfg.clone(),
        )
    }))
    .await;

    let mut failed = 0;
    for (i, result) in pending.iter().zip(scored) {
        let candidate = &mut job.results[*i];
        match result {
            Ok(scores) => {
                candidate.scores = Some(scores);
                candidate.score_error = None;
            }
            Err(message) => {
                tracing::warn!(candidate = i + 1, reference = %candidate.reference, error = %message, "Candidate could not be scored");
                candidate.score_error = Some(message);
                failed += 1;
            }
        }
    }

    let selection = Selection {
        autopick_index: pick(&job.results),
        review_needed: review_needed(&job.results, cfg),
        scored: job.results.iter().filter(|c| c.scores.is_some()).count(),
        failed,
    };

    job.meta.autopick_index = selection.autopick_index;
    job.meta.autopick_reason = selection.autopick_index.map(|_| AUTOPICK_REASON.to_string());
    job.meta.review_needed = selection.review_needed;
    job.meta.target_hex = Some(target.to_hex());

    metrics::counter!("autopick_jobs_total").increment(1);
    if selection.review_needed {
        metrics::counter!("autopick_review_needed_total").increment(1);
    }
    tracing::info!(
        autopick_index = ?selection.autopick_index,
        review_needed = selection.review_needed,
        scored = selection.scored,
        failed = selection.failed,
        "Autopick complete"
    );

    Ok(selection)
}

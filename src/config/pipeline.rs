//! Tunable constants of the scoring and top-up stages.
//!
//! Every default reproduces the behavior of the first production runs, so an
//! empty environment keeps picks and review flags comparable across versions.

use serde::Deserialize;
use std::time::Duration;

/// Weights, thresholds and heuristics used by candidate scoring.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ScoringConfig {
    /// Weight of the identity score in the total.
    #[serde(default = "default_identity_weight")]
    pub identity_weight: f64,

    /// Weight of the color score in the total.
    #[serde(default = "default_color_weight")]
    pub color_weight: f64,

    /// Any candidate with a color score below this flags the job for review.
    #[serde(default = "default_color_review_threshold")]
    pub color_review_threshold: u8,

    /// Any candidate with an identity score below this flags the job for review.
    #[serde(default = "default_identity_review_threshold")]
    pub identity_review_threshold: u8,

    /// Gaussian falloff width applied to ΔE76 when scoring color.
    #[serde(default = "default_color_falloff")]
    pub color_falloff: f64,

    /// Hair pixels must be darker than this luma.
    #[serde(default = "default_hair_luma_max")]
    pub hair_luma_max: f64,

    /// Hair pixels must be more saturated than this.
    #[serde(default = "default_hair_saturation_min")]
    pub hair_saturation_min: f64,

    /// Grey level assumed when no pixel qualifies as hair.
    #[serde(default = "default_hair_fallback_level")]
    pub hair_fallback_level: u8,

    /// Height candidates are resized to before the hair scan.
    #[serde(default = "default_color_working_height")]
    pub color_working_height: u32,

    /// Side of the square the face crops are resized to.
    #[serde(default = "default_identity_crop_size")]
    pub identity_crop_size: u32,
}

fn default_identity_weight() -> f64 {
    0.6
}
fn default_color_weight() -> f64 {
    0.4
}
fn default_color_review_threshold() -> u8 {
    35
}
fn default_identity_review_threshold() -> u8 {
    70
}
fn default_color_falloff() -> f64 {
    25.0
}
fn default_hair_luma_max() -> f64 {
    170.0
}
fn default_hair_saturation_min() -> f64 {
    0.10
}
fn default_hair_fallback_level() -> u8 {
    40
}
fn default_color_working_height() -> u32 {
    512
}
fn default_identity_crop_size() -> u32 {
    128
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            identity_weight: default_identity_weight(),
            color_weight: default_color_weight(),
            color_review_threshold: default_color_review_threshold(),
            identity_review_threshold: default_identity_review_threshold(),
            color_falloff: default_color_falloff(),
            hair_luma_max: default_hair_luma_max(),
            hair_saturation_min: default_hair_saturation_min(),
            hair_fallback_level: default_hair_fallback_level(),
            color_working_height: default_color_working_height(),
            identity_crop_size: default_identity_crop_size(),
        }
    }
}

/// Retry budget and fan-out of the top-up stage.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TopUpConfig {
    #[serde(default = "default_min_candidates")]
    pub min_candidates: u32,

    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Concurrent generation calls per batch.
    #[serde(default = "default_fan_out")]
    pub fan_out: u32,

    /// Deadline of a single generation call, in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Treat an empty generation as terminal for the whole top-up.
    #[serde(default = "default_stop_on_empty")]
    pub stop_on_empty: bool,

    /// Billed price of one generated image.
    #[serde(default = "default_cost_per_image_usd")]
    pub cost_per_image_usd: f64,

    /// Long edge requested from the generator, in pixels.
    #[serde(default = "default_max_size")]
    pub max_size: u32,
}

fn default_min_candidates() -> u32 {
    3
}
fn default_max_rounds() -> u32 {
    2
}
fn default_fan_out() -> u32 {
    1
}
fn default_call_timeout_secs() -> u64 {
    90
}
fn default_stop_on_empty() -> bool {
    true
}
fn default_cost_per_image_usd() -> f64 {
    0.039
}
fn default_max_size() -> u32 {
    1024
}

impl Default for TopUpConfig {
    fn default() -> Self {
        Self {
            min_candidates: default_min_candidates(),
            max_rounds: default_max_rounds(),
            fan_out: default_fan_out(),
            call_timeout_secs: default_call_timeout_secs(),
            stop_on_empty: default_stop_on_empty(),
            cost_per_image_usd: default_cost_per_image_usd(),
            max_size: default_max_size(),
        }
    }
}

impl TopUpConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub scoring: ScoringConfig,
    pub topup: TopUpConfig,
}

impl PipelineConfig {
    /// Load from `AUTOPICK_*` and `TOPUP_*` environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        Ok(Self {
            scoring: envy::prefixed("AUTOPICK_").from_env()?,
            topup: envy::prefixed("TOPUP_").from_env()?,
        })
    }
}
